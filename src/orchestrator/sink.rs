//! Display sinks that receive worker output forwarded by the dispatch loop.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::protocol::WorkerId;
use crate::{AppError, Result};

/// Destination for bytes pulled from a worker's local pipe.
pub trait DisplaySink {
    /// Forward `bytes` produced by `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the sink cannot accept the bytes.
    fn forward(&mut self, worker_id: WorkerId, bytes: &[u8]) -> Result<()>;
}

/// Writes raw worker output to the orchestrator's stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl DisplaySink for StdoutSink {
    fn forward(&mut self, _worker_id: WorkerId, bytes: &[u8]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(bytes)
            .and_then(|()| out.flush())
            .map_err(|err| AppError::Io(format!("stdout sink: {err}")))
    }
}

/// Per-worker output buffers shared between the sink and its observers.
pub type SharedOutput = Arc<Mutex<HashMap<WorkerId, Vec<u8>>>>;

/// Collects forwarded bytes per worker in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    output: SharedOutput,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for reading the collected output while the sink is in use.
    #[must_use]
    pub fn output(&self) -> SharedOutput {
        Arc::clone(&self.output)
    }

    /// Copy of everything forwarded for `worker_id`.
    #[must_use]
    pub fn bytes_for(&self, worker_id: WorkerId) -> Vec<u8> {
        self.output
            .lock()
            .map(|map| map.get(&worker_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl DisplaySink for MemorySink {
    fn forward(&mut self, worker_id: WorkerId, bytes: &[u8]) -> Result<()> {
        let mut map = self
            .output
            .lock()
            .map_err(|_| AppError::Io("memory sink lock poisoned".into()))?;
        map.entry(worker_id).or_default().extend_from_slice(bytes);
        Ok(())
    }
}
