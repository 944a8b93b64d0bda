//! Non-blocking capture of a subprocess's output stream.
//!
//! [`OutputCapture`] drains whatever bytes a [`PipeSource`] currently has
//! available into an append-only [`ChunkArena`] without ever blocking the
//! caller, and hands them out again in order through [`OutputCapture::take`].
//!
//! - `chunk`: the fixed-capacity chunk arena.
//! - `child_pipe`: [`PipeSource`] over a spawned child's stdout.

pub mod child_pipe;
pub mod chunk;

use std::io;

use tracing::debug;

pub use child_pipe::ChildPipe;
pub use chunk::{ChunkArena, OutputChunk, CHUNK_CAPACITY};

/// A readable, non-blocking byte stream attached to a subprocess.
pub trait PipeSource {
    /// Read into `buf` without blocking.
    ///
    /// Returns `Ok(0)` at end of stream and an error of kind
    /// [`io::ErrorKind::WouldBlock`] when no bytes are available yet.
    ///
    /// # Errors
    ///
    /// Any error other than `WouldBlock` or `Interrupted` ends the stream.
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Exit status of the producing process, if it has exited.
    fn exit_code(&mut self) -> Option<i32>;

    /// Close the read end. Later reads report end of stream.
    fn close(&mut self) {}
}

/// Captured output of one worker subprocess.
#[derive(Debug)]
pub struct OutputCapture<P> {
    source: P,
    arena: ChunkArena,
    forwarded: usize,
    finished: bool,
    exit_code: Option<i32>,
}

impl<P: PipeSource> OutputCapture<P> {
    /// Start capturing from `source`.
    #[must_use]
    pub fn new(source: P) -> Self {
        Self {
            source,
            arena: ChunkArena::new(),
            forwarded: 0,
            finished: false,
            exit_code: None,
        }
    }

    /// Drain every byte currently available from the source.
    ///
    /// Returns `true` once the stream is finished (end of stream or a read
    /// error), `false` when the source has no more bytes right now. One call
    /// empties everything the source had buffered at call time; a single read
    /// never exceeds the active chunk's remaining capacity.
    pub fn poll(&mut self) -> bool {
        if self.finished {
            return true;
        }

        loop {
            let spare = self.arena.spare();
            match self.source.read_nonblocking(spare) {
                Ok(0) => {
                    debug!(captured = self.arena.len(), "capture: end of stream");
                    self.finish();
                    return true;
                }
                Ok(n) => self.arena.commit(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return false,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(%err, captured = self.arena.len(), "capture: stream error");
                    self.finish();
                    return true;
                }
            }
        }
    }

    /// Hand out up to `max` captured bytes that have not been taken yet.
    ///
    /// The bytes stay in the arena; only the forwarding cursor advances.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let out = self.arena.copy_range(self.forwarded, max);
        self.forwarded += out.len();
        out
    }

    /// Captured bytes not yet handed out by [`take`](Self::take).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.arena.len() - self.forwarded
    }

    /// Whether the stream has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Exit status recorded when the stream ended.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Every byte captured so far, in order.
    #[must_use]
    pub fn transcript(&self) -> Vec<u8> {
        self.arena.copy_range(0, self.arena.len())
    }

    /// Close the source and mark the stream finished. Bytes already captured
    /// stay readable through [`take`](Self::take).
    pub fn close(&mut self) {
        if !self.finished {
            self.finish();
        }
        self.source.close();
    }

    /// Mutable access to the source, e.g. for reaping a child process.
    pub fn source_mut(&mut self) -> &mut P {
        &mut self.source
    }

    /// The underlying chunk arena.
    #[must_use]
    pub fn arena(&self) -> &ChunkArena {
        &self.arena
    }

    fn finish(&mut self) {
        self.finished = true;
        self.exit_code = self.source.exit_code();
    }
}
