//! Work executed by a worker agent.
//!
//! Output goes to the agent's stdout, which is the orchestrator's local
//! pipe. Every byte written is accounted on the [`ProgressReporter`] so
//! UPDATE messages announce exactly what the pipe received.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::agent::reporter::{ProgressReporter, Transport};
use crate::lifecycle::interrupted;
use crate::{AppError, Result};

/// Relay buffer for command output.
const RELAY_BUFFER: usize = 8192;

/// The assigned work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSpec {
    /// Write `count` lines of `text`, reporting after each one.
    Lines {
        /// Number of lines.
        count: u32,
        /// Line content, without the trailing newline.
        text: String,
        /// Pause after each line.
        interval: Duration,
    },
    /// Run an external command and relay its stdout.
    Command {
        /// Executable.
        program: String,
        /// Arguments.
        args: Vec<String>,
        /// Period of the progress ticker.
        update_interval: Duration,
    },
}

/// Run `spec`, writing output to `out`.
///
/// Returns the task status: `0` for [`TaskSpec::Lines`], the exit code for
/// [`TaskSpec::Command`].
///
/// # Errors
///
/// Returns `AppError::Pipe` if `out` rejects a write, `AppError::Spawn` if
/// the command cannot be started, `AppError::Agent` if it is killed by a
/// signal, and `AppError::Interrupted` if `cancel` fires.
pub async fn run_task<W, T>(
    spec: &TaskSpec,
    out: &mut W,
    reporter: &mut ProgressReporter<T>,
    cancel: &CancellationToken,
) -> Result<i32>
where
    W: AsyncWrite + Unpin,
    T: Transport,
{
    match spec {
        TaskSpec::Lines {
            count,
            text,
            interval,
        } => write_lines(*count, text, *interval, out, reporter, cancel).await,
        TaskSpec::Command {
            program,
            args,
            update_interval,
        } => run_command(program, args, *update_interval, out, reporter, cancel).await,
    }
}

async fn write_lines<W, T>(
    count: u32,
    text: &str,
    interval: Duration,
    out: &mut W,
    reporter: &mut ProgressReporter<T>,
    cancel: &CancellationToken,
) -> Result<i32>
where
    W: AsyncWrite + Unpin,
    T: Transport,
{
    let line = format!("{text}\n");
    for index in 0..count {
        if cancel.is_cancelled() {
            return Err(interrupted("line task"));
        }
        write_through(out, line.as_bytes()).await?;
        reporter.record(line.len());
        reporter.report_progress();
        debug!(line = index, bytes = line.len(), "line written");

        if !interval.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(interrupted("line task")),
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
    Ok(0)
}

async fn run_command<W, T>(
    program: &str,
    args: &[String],
    update_interval: Duration,
    out: &mut W,
    reporter: &mut ProgressReporter<T>,
    cancel: &CancellationToken,
) -> Result<i32>
where
    W: AsyncWrite + Unpin,
    T: Transport,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn task {program}: {err}")))?;
    info!(program, pid = child.id().unwrap_or(0), "task command spawned");

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn(format!("task {program} stdout was not captured")))?;

    relay(&mut stdout, out, update_interval, reporter, cancel).await?;

    let status = tokio::select! {
        () = cancel.cancelled() => return Err(interrupted("task command")),
        status = child.wait() => status
            .map_err(|err| AppError::Agent(format!("failed to wait for task {program}: {err}")))?,
    };
    let code = status
        .code()
        .ok_or_else(|| AppError::Agent(format!("task {program} terminated by signal")))?;
    info!(program, code, "task command exited");
    Ok(code)
}

/// Copy `source` to `out` until end of stream, reporting on every tick.
async fn relay<R, W, T>(
    source: &mut R,
    out: &mut W,
    update_interval: Duration,
    reporter: &mut ProgressReporter<T>,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    T: Transport,
{
    let mut ticker = tokio::time::interval(update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; RELAY_BUFFER];

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(interrupted("task relay")),
            _ = ticker.tick() => {
                reporter.report_progress();
            }
            read = source.read(&mut buf) => {
                let n = read.map_err(|err| AppError::Pipe(format!("task output read failed: {err}")))?;
                if n == 0 {
                    return Ok(());
                }
                write_through(out, &buf[..n]).await?;
                reporter.record(n);
            }
        }
    }
}

async fn write_through<W: AsyncWrite + Unpin>(out: &mut W, bytes: &[u8]) -> Result<()> {
    out.write_all(bytes)
        .await
        .map_err(|err| AppError::Pipe(format!("stdout write failed: {err}")))?;
    out.flush()
        .await
        .map_err(|err| AppError::Pipe(format!("stdout flush failed: {err}")))
}
