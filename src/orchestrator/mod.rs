//! Fleet orchestration.
//!
//! Startup binds the sockets, spawns the agents, and collects one handshake
//! per worker; the dispatch loop then relays output until every worker has
//! shut down or crashed. Sockets are owned by a [`SocketRegistry`] that is
//! released on every exit path.
//!
//! - `ports`: TCP/UDP port probing.
//! - `spawner`: agent process launch.
//! - `handshake`: control-plane accept loop.
//! - `record`: per-worker bookkeeping.
//! - `dispatch`: data-plane loop and run report.
//! - `sink`: display destinations for forwarded output.

pub mod dispatch;
pub mod handshake;
pub mod ports;
pub mod record;
pub mod sink;
pub mod spawner;

use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::FleetConfig;
use crate::lifecycle::SocketRegistry;
use crate::{AppError, Result};

pub use dispatch::{DispatchSettings, Dispatcher, FleetReport, Outcome, WorkerSummary};
pub use record::{Termination, WorkerRecord};
pub use sink::{DisplaySink, MemorySink, StdoutSink};

/// Run a complete fleet: startup, dispatch, teardown.
///
/// # Errors
///
/// Returns `AppError::Startup`, `AppError::Spawn`, or `AppError::Protocol`
/// for startup faults, and `AppError::Interrupted` if `cancel` fires before
/// every worker has terminated. Sockets are released and spawned agents are
/// killed or reaped in every case.
pub async fn run_fleet<S: DisplaySink>(
    config: &FleetConfig,
    sink: S,
    cancel: &CancellationToken,
) -> Result<FleetReport> {
    let span = info_span!("fleet", workers = config.workers);
    async move {
        let mut registry: SocketRegistry<TcpListener, UdpSocket> = SocketRegistry::new();
        let result = run_with_registry(config, sink, cancel, &mut registry).await;
        registry.release_all();
        result
    }
    .instrument(span)
    .await
}

async fn run_with_registry<S: DisplaySink>(
    config: &FleetConfig,
    sink: S,
    cancel: &CancellationToken,
    registry: &mut SocketRegistry<TcpListener, UdpSocket>,
) -> Result<FleetReport> {
    let program = config.agent_program()?;

    let (listener, socket, ports) = ports::bind_ports(&config.ports).await?;
    registry.register_tcp(listener)?;
    registry.register_udp(socket)?;

    let mut records = spawner::spawn_agents(&program, &config.agent_args, config.workers, ports)?;

    let listener = registry
        .tcp()
        .ok_or_else(|| AppError::Startup("tcp listener not registered".into()))?;
    handshake::accept_handshakes(listener, &mut records, &config.timeouts, cancel).await?;
    registry.release_tcp();
    info!(workers = records.len(), "all handshakes complete");

    let socket = registry
        .udp()
        .ok_or_else(|| AppError::Startup("udp socket not registered".into()))?;
    let mut dispatcher = Dispatcher::new(records, sink, DispatchSettings::from(&config.timeouts));
    dispatcher.run(socket, cancel).await?;

    let mut report = dispatcher.report();
    let grace = config.timeouts.pipe_drain();
    for (worker_id, mut capture) in dispatcher.take_released() {
        let code = capture.source_mut().reap(grace).await;
        if let Some(summary) = report.workers.iter_mut().find(|w| w.worker_id == worker_id) {
            summary.exit_code = code.or(summary.exit_code);
        }
    }

    for worker in &report.workers {
        info!(
            worker_id = worker.worker_id,
            termination = ?worker.termination,
            task_id = ?worker.task_id,
            status_code = ?worker.status_code,
            exit_code = ?worker.exit_code,
            announced = worker.bytes_announced,
            forwarded = worker.bytes_forwarded,
            "worker summary"
        );
    }
    if report.crashed() > 0 {
        warn!(crashed = report.crashed(), "fleet finished with crashed workers");
    }
    Ok(report)
}
