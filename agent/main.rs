#![forbid(unsafe_code)]

//! `fleetwire-agent`: worker agent launched by the `fleetwire` orchestrator.
//!
//! Registers over TCP, runs its task with stdout as the output pipe, and
//! reports progress over UDP. Logs go to stderr. Exits with the task status,
//! or 1 if the control plane fails or the task crashes.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{fmt, EnvFilter};

use fleetwire::agent::{run_agent, AgentConfig, TaskSpec};
use fleetwire::lifecycle::install_signal_listener;
use fleetwire::protocol::WorkerId;
use fleetwire::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "fleetwire-agent",
    about = "Worker agent for the fleetwire orchestrator",
    version,
    long_about = None
)]
struct Cli {
    /// Worker id assigned by the orchestrator.
    worker_id: WorkerId,

    /// Orchestrator TCP (handshake) port.
    tcp_port: u16,

    /// Orchestrator UDP (lifecycle) port.
    udp_port: u16,

    /// Lines to write when no command is given.
    #[arg(long, default_value_t = 5)]
    lines: u32,

    /// Content of each line.
    #[arg(long, default_value = "hello from fleetwire")]
    text: String,

    /// Pause after each line, in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Progress report period for command tasks, in milliseconds.
    #[arg(long, default_value_t = 250)]
    update_interval_ms: u64,

    /// Task id announced with TASK_INIT; defaults to the worker id.
    #[arg(long)]
    task_id: Option<i32>,

    /// Control-plane connect timeout, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    connect_timeout_ms: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Command to run instead of the line task.
    #[arg(last = true)]
    command: Vec<String>,
}

impl Cli {
    fn into_config(self) -> AgentConfig {
        let task = match self.command.split_first() {
            Some((program, args)) => TaskSpec::Command {
                program: program.clone(),
                args: args.to_vec(),
                update_interval: Duration::from_millis(self.update_interval_ms.max(1)),
            },
            None => TaskSpec::Lines {
                count: self.lines,
                text: self.text,
                interval: Duration::from_millis(self.interval_ms),
            },
        };
        AgentConfig {
            worker_id: self.worker_id,
            tcp_port: self.tcp_port,
            udp_port: self.udp_port,
            task_id: self.task_id.unwrap_or(self.worker_id),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            task,
        }
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("fleetwire-agent: {err}");
        return ExitCode::FAILURE;
    }

    match start(args.into_config()) {
        Ok(status) => ExitCode::from(u8::try_from(status).unwrap_or(1)),
        Err(err) => {
            error!(%err, "agent failed");
            ExitCode::FAILURE
        }
    }
}

fn start(config: AgentConfig) -> Result<i32> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(async {
            let ct = CancellationToken::new();
            let listener = install_signal_listener(ct.clone())?;
            let mut stdout = tokio::io::stdout();
            let result = run_agent(&config, &mut stdout, &ct).await;
            ct.cancel();
            if let Err(err) = listener.await {
                warn!(%err, "signal listener task failed");
            }
            result
        })
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
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
