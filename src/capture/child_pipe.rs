//! [`PipeSource`] over a spawned child process's stdout.
//!
//! The stdout handle is detached from the tokio reactor and switched to
//! `O_NONBLOCK`, so reads return `WouldBlock` instead of parking the
//! dispatch loop.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::process::{Child, ChildStdout};
use tracing::warn;

use crate::capture::PipeSource;
use crate::{AppError, Result};

/// A child process together with its non-blocking stdout pipe.
#[derive(Debug)]
pub struct ChildPipe {
    child: Child,
    stdout: Option<File>,
}

impl ChildPipe {
    /// Take ownership of `child` and its piped `stdout`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pipe`] if the pipe cannot be detached or switched
    /// to non-blocking mode.
    pub fn new(child: Child, stdout: ChildStdout) -> Result<Self> {
        let fd: OwnedFd = stdout
            .into_owned_fd()
            .map_err(|err| AppError::Pipe(format!("failed to detach child stdout: {err}")))?;
        set_nonblocking(&fd)?;
        Ok(Self {
            child,
            stdout: Some(File::from(fd)),
        })
    }

    /// OS process id, if the child has not been reaped yet.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit, killing it if it outlives `grace`.
    pub async fn reap(&mut self, grace: std::time::Duration) -> Option<i32> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(err)) => {
                warn!(%err, "failed to wait for worker process");
                None
            }
            Err(_elapsed) => {
                warn!(pid = self.child.id(), "worker process outlived grace period, killing");
                self.child.kill().await.ok();
                None
            }
        }
    }
}

impl PipeSource for ChildPipe {
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout {
            Some(ref mut stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }

    fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => status.code(),
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "failed to poll worker exit status");
                None
            }
        }
    }

    fn close(&mut self) {
        self.stdout = None;
    }
}

fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let raw = fd.as_raw_fd();
    let flags = fcntl(raw, FcntlArg::F_GETFL)
        .map_err(|err| AppError::Pipe(format!("F_GETFL failed: {err}")))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(raw, FcntlArg::F_SETFL(flags))
        .map_err(|err| AppError::Pipe(format!("F_SETFL failed: {err}")))?;
    Ok(())
}
