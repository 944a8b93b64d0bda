#![forbid(unsafe_code)]

//! `fleetwire`: worker fleet orchestrator binary.
//!
//! Spawns the worker agents, collects their handshakes, and relays their
//! output to stdout until every worker has shut down. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fleetwire::lifecycle::install_signal_listener;
use fleetwire::orchestrator::{run_fleet, FleetReport, StdoutSink};
use fleetwire::{AppError, FleetConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "fleetwire", about = "Worker fleet orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the number of workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Override the worker-agent executable.
    #[arg(long)]
    agent: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Extra arguments passed to every agent after its ports.
    #[arg(last = true)]
    agent_args: Vec<String>,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("fleetwire: {err}");
        return ExitCode::FAILURE;
    }

    match start(args) {
        Ok(report) if report.all_shutdown() => ExitCode::SUCCESS,
        Ok(report) => {
            error!(crashed = report.crashed(), "fleet finished with failures");
            ExitCode::FAILURE
        }
        Err(err) => {
            error!(%err, "fleet aborted");
            ExitCode::from(err.exit_status())
        }
    }
}

fn start(args: Cli) -> Result<FleetReport> {
    let config = load_config(args)?;
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

fn load_config(args: Cli) -> Result<FleetConfig> {
    let mut config = match args.config {
        Some(ref path) => FleetConfig::load_from_path(path)?,
        None => FleetConfig::default(),
    };

    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(agent) = args.agent {
        config.agent_program = Some(agent);
    }
    if !args.agent_args.is_empty() {
        config.agent_args = args.agent_args;
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: FleetConfig) -> Result<FleetReport> {
    info!(workers = config.workers, "fleetwire starting");

    let ct = CancellationToken::new();
    let listener = install_signal_listener(ct.clone())?;

    let result = run_fleet(&config, StdoutSink, &ct).await;

    ct.cancel();
    if let Err(err) = listener.await {
        warn!(%err, "signal listener task failed");
    }
    result
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
