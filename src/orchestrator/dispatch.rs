//! Orchestrator dispatch loop.
//!
//! Single-threaded: one datagram is received (bounded by the receive
//! timeout), validated, and handled completely before the next receive.
//!
//! | Message      | Effect                                                    |
//! |--------------|-----------------------------------------------------------|
//! | `Update(k)`  | drain up to `k` bytes from the worker's local pipe to the sink |
//! | `TaskInit`   | recorded and logged                                       |
//! | `TaskDone`   | recorded and logged                                       |
//! | `Shutdown`   | record released, live count decremented                   |
//! | `Crash`      | same as `Shutdown`, logged as a crash                     |
//!
//! Datagrams that are undersized, carry the wrong magic, name a worker id
//! outside `[0, N)`, or come from a worker without a completed handshake are
//! dropped without touching any record.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::capture::{OutputCapture, PipeSource};
use crate::config::TimeoutConfig;
use crate::lifecycle::interrupted;
use crate::orchestrator::record::{Termination, WorkerRecord};
use crate::orchestrator::sink::DisplaySink;
use crate::protocol::{
    validate_worker_id, DecodeError, LifecycleMessage, MessageKind, WorkerId, LIFECYCLE_LEN,
};
use crate::Result;

/// Interval between pipe drains while waiting for announced bytes.
pub const PIPE_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Receive buffer; larger than a lifecycle record so oversized datagrams
/// are still read whole.
const RECV_BUFFER: usize = 4 * LIFECYCLE_LEN;

/// Timing knobs for the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Bound on each UDP receive; expiry just polls again.
    pub receive_timeout: Duration,
    /// Bound on waiting for announced bytes to reach a local pipe.
    pub pipe_drain: Duration,
}

impl From<&TimeoutConfig> for DispatchSettings {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            receive_timeout: timeouts.udp_receive(),
            pipe_drain: timeouts.pipe_drain(),
        }
    }
}

/// Why a datagram was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Undersized or wrong magic.
    Malformed(DecodeError),
    /// Worker id outside `[0, N)`.
    OutOfRange(WorkerId),
    /// Worker has not completed its handshake.
    Orphaned(WorkerId),
    /// Worker already shut down or crashed.
    Retired(WorkerId),
}

/// Result of handling one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Message was valid and applied.
    Handled(MessageKind),
    /// Message was discarded without side effects.
    Dropped(DropReason),
    /// Valid envelope with an unknown message type; logged only.
    Ignored {
        /// Sending worker.
        worker_id: WorkerId,
        /// Raw type discriminant.
        raw: i32,
    },
}

/// Final state of one worker after the loop ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Worker id.
    pub worker_id: WorkerId,
    /// How the worker terminated; `None` if the loop was cut short.
    pub termination: Option<Termination>,
    /// Task announced by TASK_INIT.
    pub task_id: Option<i32>,
    /// Status announced by TASK_DONE.
    pub status_code: Option<i32>,
    /// Bytes announced over UDP.
    pub bytes_announced: u64,
    /// Bytes forwarded to the display sink.
    pub bytes_forwarded: u64,
    /// Exit status of the agent process once reaped.
    pub exit_code: Option<i32>,
}

/// Summary of a completed fleet run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetReport {
    /// One entry per worker, ordered by id.
    pub workers: Vec<WorkerSummary>,
}

impl FleetReport {
    /// Whether every worker terminated with SHUTDOWN.
    #[must_use]
    pub fn all_shutdown(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.termination == Some(Termination::Shutdown))
    }

    /// Number of workers that reported CRASH.
    #[must_use]
    pub fn crashed(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| w.termination == Some(Termination::Crashed))
            .count()
    }
}

/// Dispatch-loop state: the worker table, the display sink, and the live
/// counter.
#[derive(Debug)]
pub struct Dispatcher<P, S, C = tokio::net::TcpStream> {
    records: Vec<WorkerRecord<P, C>>,
    sink: S,
    live: usize,
    settings: DispatchSettings,
    released: Vec<(WorkerId, OutputCapture<P>)>,
}

impl<P: PipeSource, S: DisplaySink, C> Dispatcher<P, S, C> {
    /// Build a dispatcher over `records`; every live record counts towards
    /// termination.
    #[must_use]
    pub fn new(records: Vec<WorkerRecord<P, C>>, sink: S, settings: DispatchSettings) -> Self {
        let live = records.iter().filter(|r| r.is_live()).count();
        Self {
            records,
            sink,
            live,
            settings,
            released: Vec::new(),
        }
    }

    /// Workers still expected to send messages.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live
    }

    /// The worker table.
    #[must_use]
    pub fn records(&self) -> &[WorkerRecord<P, C>] {
        &self.records
    }

    /// The display sink.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Captures released by terminated workers, in release order.
    pub fn take_released(&mut self) -> Vec<(WorkerId, OutputCapture<P>)> {
        std::mem::take(&mut self.released)
    }

    /// Receive and handle datagrams until every worker has terminated.
    ///
    /// Receive timeouts and receive errors are logged and retried. A pending
    /// UPDATE drain is abandoned as soon as `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Interrupted`](crate::AppError::Interrupted) if
    /// `cancel` fires first.
    pub async fn run(&mut self, socket: &UdpSocket, cancel: &CancellationToken) -> Result<()> {
        let span = info_span!("dispatch", workers = self.records.len());
        async move {
            let mut buf = [0u8; RECV_BUFFER];
            while self.live > 0 {
                let received = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(interrupted("dispatch loop")),
                    received = tokio::time::timeout(
                        self.settings.receive_timeout,
                        socket.recv_from(&mut buf),
                    ) => received,
                };

                match received {
                    Err(_elapsed) => {
                        debug!(live = self.live, "no datagram within receive timeout");
                    }
                    Ok(Err(err)) => {
                        warn!(%err, "udp receive failed");
                    }
                    Ok(Ok((len, from))) => {
                        let outcome = tokio::select! {
                            biased;
                            () = cancel.cancelled() => return Err(interrupted("dispatch loop")),
                            outcome = self.handle_datagram(&buf[..len]) => outcome,
                        };
                        debug!(%from, len, ?outcome, "datagram handled");
                    }
                }
            }
            info!("all workers terminated");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Decode, validate, and apply one datagram.
    pub async fn handle_datagram(&mut self, datagram: &[u8]) -> Outcome {
        match LifecycleMessage::decode(datagram) {
            Ok(message) => self.handle_message(message).await,
            Err(DecodeError::UnknownType { worker_id, raw }) => {
                warn!(worker_id, raw, "ignoring unknown message type");
                Outcome::Ignored { worker_id, raw }
            }
            Err(err) => {
                debug!(%err, "dropping malformed datagram");
                Outcome::Dropped(DropReason::Malformed(err))
            }
        }
    }

    /// Validate the sender of `message` and apply it.
    pub async fn handle_message(&mut self, message: LifecycleMessage) -> Outcome {
        let worker_id = message.worker_id;
        let Some(idx) = validate_worker_id(worker_id, self.records.len()) else {
            debug!(worker_id, "dropping message with out-of-range worker id");
            return Outcome::Dropped(DropReason::OutOfRange(worker_id));
        };
        if !self.records[idx].is_handshaken() {
            debug!(worker_id, kind = message.kind.name(), "dropping orphaned message");
            return Outcome::Dropped(DropReason::Orphaned(worker_id));
        }
        if !self.records[idx].is_live() {
            debug!(worker_id, kind = message.kind.name(), "dropping message from retired worker");
            return Outcome::Dropped(DropReason::Retired(worker_id));
        }

        match message.kind {
            MessageKind::Update { bytes_written } => {
                self.forward_update(idx, bytes_written).await;
            }
            MessageKind::TaskInit { task_id } => {
                info!(worker_id, task_id, "task initialized");
                self.records[idx].task_id = Some(task_id);
            }
            MessageKind::TaskDone { status_code } => {
                info!(worker_id, status_code, "task completed");
                self.records[idx].status_code = Some(status_code);
            }
            MessageKind::Shutdown => self.retire(idx, Termination::Shutdown),
            MessageKind::Crash => self.retire(idx, Termination::Crashed),
        }
        Outcome::Handled(message.kind)
    }

    /// Build the per-worker summary.
    #[must_use]
    pub fn report(&self) -> FleetReport {
        FleetReport {
            workers: self
                .records
                .iter()
                .map(|r| WorkerSummary {
                    worker_id: r.id(),
                    termination: r.termination,
                    task_id: r.task_id,
                    status_code: r.status_code,
                    bytes_announced: r.bytes_announced,
                    bytes_forwarded: r.bytes_forwarded,
                    exit_code: r.pipe().and_then(OutputCapture::exit_code),
                })
                .collect(),
        }
    }

    async fn forward_update(&mut self, idx: usize, announced: u64) {
        let want = usize::try_from(announced).unwrap_or(usize::MAX);
        let deadline = Instant::now() + self.settings.pipe_drain;
        let record = &mut self.records[idx];
        let worker_id = record.id();
        record.bytes_announced = record.bytes_announced.saturating_add(announced);

        let Some(capture) = record.pipe_mut() else {
            warn!(worker_id, announced, "update for worker without a local pipe");
            return;
        };

        let mut finished = capture.poll();
        while capture.pending() < want && !finished && Instant::now() < deadline {
            tokio::time::sleep(PIPE_RETRY_INTERVAL).await;
            finished = capture.poll();
        }
        let bytes = capture.take(want);

        if bytes.len() < want {
            warn!(
                worker_id,
                announced,
                forwarded = bytes.len(),
                eof = finished,
                "short read from local pipe"
            );
        }

        record.bytes_forwarded += bytes.len() as u64;
        if let Err(err) = self.sink.forward(worker_id, &bytes) {
            warn!(worker_id, %err, "display sink rejected worker output");
        }
        debug!(worker_id, bytes = bytes.len(), "forwarded worker output");
    }

    fn retire(&mut self, idx: usize, how: Termination) {
        let record = &mut self.records[idx];
        let worker_id = record.id();
        if let Some(capture) = record.terminate(how) {
            self.released.push((worker_id, capture));
        }
        self.live -= 1;
        match how {
            Termination::Shutdown => {
                info!(worker_id, remaining = self.live, "worker shut down");
            }
            Termination::Crashed => {
                warn!(worker_id, remaining = self.live, "worker crashed");
            }
        }
    }
}
