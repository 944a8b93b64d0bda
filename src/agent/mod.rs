//! Worker agent.
//!
//! An agent registers with the orchestrator over TCP, runs its task with
//! stdout as the local output pipe, and reports progress over UDP:
//!
//! ```text
//! Connecting -> Registered -> Running -> Done
//!                                     \-> Crashed
//! ```
//!
//! Control-plane failures are fatal and never retried. Data-plane failures
//! during the task are retried on the next progress report.
//!
//! - `reporter`: UDP lifecycle reporting with the unreported-bytes counter.
//! - `task`: the work an agent performs.

pub mod reporter;
pub mod task;

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::lifecycle::interrupted;
use crate::protocol::{Handshake, HandshakeCodec, MessageKind, WorkerId};
use crate::{AppError, Result};

pub use reporter::{ProgressReporter, Transport, UdpTransport};
pub use task::{run_task, TaskSpec};

/// Agent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Opening the control-plane connection.
    Connecting,
    /// Handshake sent.
    Registered,
    /// Task in progress.
    Running,
    /// Task finished and SHUTDOWN sent.
    Done,
    /// Fatal error while running; CRASH sent best-effort.
    Crashed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Running => "running",
            Self::Done => "done",
            Self::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// Everything an agent needs to run, as passed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Worker id assigned by the orchestrator.
    pub worker_id: WorkerId,
    /// Orchestrator control-plane port.
    pub tcp_port: u16,
    /// Orchestrator data-plane port.
    pub udp_port: u16,
    /// Task id announced with TASK_INIT.
    pub task_id: i32,
    /// Bound on the control-plane connect.
    pub connect_timeout: Duration,
    /// Work to perform.
    pub task: TaskSpec,
}

/// Tracks the current state and logs each transition.
#[derive(Debug)]
struct StateTracker {
    worker_id: WorkerId,
    state: AgentState,
}

impl StateTracker {
    fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            state: AgentState::Connecting,
        }
    }

    fn advance(&mut self, to: AgentState) {
        info!(worker_id = self.worker_id, from = %self.state, to = %to, "agent state change");
        self.state = to;
    }
}

/// Connect to the orchestrator's control plane.
///
/// # Errors
///
/// Returns `AppError::Agent` on failure or timeout, `AppError::Interrupted`
/// if `cancel` fires.
pub async fn connect_control(
    tcp_port: u16,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TcpStream> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, tcp_port));
    tokio::select! {
        () = cancel.cancelled() => Err(interrupted("control-plane connect")),
        result = tokio::time::timeout(timeout, TcpStream::connect(addr)) => match result {
            Err(_elapsed) => Err(AppError::Agent(format!(
                "connect to {addr} timed out after {}ms",
                timeout.as_millis()
            ))),
            Ok(Err(err)) => Err(AppError::Agent(format!("connect to {addr} failed: {err}"))),
            Ok(Ok(stream)) => Ok(stream),
        },
    }
}

/// Run a worker agent to completion with `out` as its local pipe.
///
/// Returns the task status once TASK_DONE and SHUTDOWN were attempted; a
/// failed lifecycle send is logged and never changes the status.
///
/// # Errors
///
/// Returns `AppError::Agent` if the control plane cannot be established,
/// or the task's error after a best-effort CRASH.
pub async fn run_agent<W: AsyncWrite + Unpin>(
    config: &AgentConfig,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<i32> {
    let span = info_span!("agent", worker_id = config.worker_id);
    async move {
        let mut tracker = StateTracker::new(config.worker_id);

        let stream = connect_control(config.tcp_port, config.connect_timeout, cancel).await?;
        let mut control = FramedWrite::new(stream, HandshakeCodec);
        control
            .send(Handshake::new(config.worker_id))
            .await
            .map_err(|err| AppError::Agent(format!("handshake send failed: {err}")))?;
        tracker.advance(AgentState::Registered);

        let transport = UdpTransport::connect(config.udp_port)?;
        let mut reporter = ProgressReporter::new(config.worker_id, transport);
        tracker.advance(AgentState::Running);

        if let Err(err) = reporter.send(MessageKind::TaskInit {
            task_id: config.task_id,
        }) {
            warn!(%err, "task init not delivered");
        }

        match run_task(&config.task, out, &mut reporter, cancel).await {
            Ok(status_code) => {
                if !reporter.report_progress() {
                    warn!(unreported = reporter.unreported(), "final update not delivered");
                }
                if let Err(err) = reporter.send(MessageKind::TaskDone { status_code }) {
                    warn!(%err, "task done not delivered");
                }
                if let Err(err) = reporter.send(MessageKind::Shutdown) {
                    warn!(%err, "shutdown not delivered");
                }
                tracker.advance(AgentState::Done);
                info!(status_code, reported = reporter.reported(), "task complete");
                drop(control);
                Ok(status_code)
            }
            Err(err) => {
                warn!(%err, "task failed");
                reporter.report_progress();
                if let Err(send_err) = reporter.send(MessageKind::Crash) {
                    warn!(%send_err, "crash report not delivered");
                }
                tracker.advance(AgentState::Crashed);
                drop(control);
                Err(err)
            }
        }
    }
    .instrument(span)
    .await
}
