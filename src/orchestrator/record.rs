//! Per-worker bookkeeping owned by the orchestrator.

use tokio::net::TcpStream;
use tracing::debug;

use crate::capture::{OutputCapture, PipeSource};
use crate::protocol::WorkerId;

/// How a worker left the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Sent SHUTDOWN.
    Shutdown,
    /// Sent CRASH.
    Crashed,
}

/// State the orchestrator keeps for one worker id in `[0, N)`.
///
/// `C` is the control-plane connection type; it is only ever stored and
/// dropped, never read after the handshake.
#[derive(Debug)]
pub struct WorkerRecord<P, C = TcpStream> {
    id: WorkerId,
    connection: Option<C>,
    pipe: Option<OutputCapture<P>>,
    live: bool,
    handshaken: bool,
    /// Task announced by TASK_INIT.
    pub task_id: Option<i32>,
    /// Status announced by TASK_DONE.
    pub status_code: Option<i32>,
    /// Bytes forwarded to the display sink.
    pub bytes_forwarded: u64,
    /// Bytes announced by UPDATE messages.
    pub bytes_announced: u64,
    /// How the worker terminated, once it has.
    pub termination: Option<Termination>,
}

impl<P: PipeSource, C> WorkerRecord<P, C> {
    /// Record created at spawn time: pipe set, connection unset, live.
    #[must_use]
    pub fn spawned(id: WorkerId, pipe: P) -> Self {
        Self {
            id,
            connection: None,
            pipe: Some(OutputCapture::new(pipe)),
            live: true,
            handshaken: false,
            task_id: None,
            status_code: None,
            bytes_forwarded: 0,
            bytes_announced: 0,
            termination: None,
        }
    }

    /// Worker id.
    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Attach the handshake connection. Only the first call has effect;
    /// returns `false` if a handshake was already recorded.
    pub fn attach(&mut self, connection: C) -> bool {
        if self.handshaken {
            return false;
        }
        self.connection = Some(connection);
        self.handshaken = true;
        true
    }

    /// Whether the worker completed its handshake.
    #[must_use]
    pub fn is_handshaken(&self) -> bool {
        self.handshaken
    }

    /// Whether further activity is expected from this worker.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Whether the control-plane connection is still held.
    #[must_use]
    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Local output capture, while the record holds it.
    pub fn pipe_mut(&mut self) -> Option<&mut OutputCapture<P>> {
        self.pipe.as_mut()
    }

    /// Local output capture, while the record holds it.
    #[must_use]
    pub fn pipe(&self) -> Option<&OutputCapture<P>> {
        self.pipe.as_ref()
    }

    /// Release connection and pipe and mark the worker terminated.
    ///
    /// Returns the released capture so the caller can reap the process.
    /// Only the first call has effect.
    pub fn terminate(&mut self, how: Termination) -> Option<OutputCapture<P>> {
        if !self.live {
            return None;
        }
        self.live = false;
        self.termination = Some(how);
        self.connection = None;
        let mut pipe = self.pipe.take();
        if let Some(ref mut capture) = pipe {
            capture.close();
            debug!(
                worker_id = self.id,
                unannounced = capture.pending(),
                "worker record released"
            );
        }
        pipe
    }
}
