//! Worker-agent process spawner.
//!
//! Each worker id in `[0, N)` gets its own agent process launched as
//! `<agent> <worker_id> <tcp_port> <udp_port> [agent args...]` with stdout
//! piped back to the orchestrator and `kill_on_drop(true)` so an aborted
//! startup never leaves agents behind.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, info_span};

use crate::capture::ChildPipe;
use crate::orchestrator::ports::Ports;
use crate::orchestrator::record::WorkerRecord;
use crate::protocol::WorkerId;
use crate::{AppError, Result};

/// Spawn one agent process for `worker_id`.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the process cannot be started or its stdout
/// was not captured, or `AppError::Pipe` if the pipe cannot be made
/// non-blocking.
pub fn spawn_agent(
    program: &Path,
    extra_args: &[String],
    worker_id: WorkerId,
    ports: Ports,
) -> Result<ChildPipe> {
    let mut cmd = Command::new(program);
    cmd.arg(worker_id.to_string())
        .arg(ports.tcp.to_string())
        .arg(ports.udp.to_string())
        .args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn worker {worker_id} ({}): {err}",
            program.display()
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn(format!("worker {worker_id} stdout was not captured")))?;

    info!(
        worker_id,
        pid = child.id().unwrap_or(0),
        "agent process spawned"
    );
    ChildPipe::new(child, stdout)
}

/// Spawn `workers` agents and build their records, ordered by worker id.
///
/// Agents spawned before a failure are killed when the partial table is
/// dropped.
///
/// # Errors
///
/// Propagates the first [`spawn_agent`] failure.
pub fn spawn_agents(
    program: &Path,
    extra_args: &[String],
    workers: usize,
    ports: Ports,
) -> Result<Vec<WorkerRecord<ChildPipe>>> {
    let span = info_span!("spawn_agents", workers, agent = %program.display());
    let _guard = span.enter();

    let mut records = Vec::with_capacity(workers);
    for index in 0..workers {
        let worker_id = WorkerId::try_from(index)
            .map_err(|_| AppError::Spawn(format!("worker index {index} exceeds id range")))?;
        let pipe = spawn_agent(program, extra_args, worker_id, ports)?;
        records.push(WorkerRecord::spawned(worker_id, pipe));
    }
    Ok(records)
}
