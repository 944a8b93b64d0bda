//! Control-plane handshake acceptance.
//!
//! Connections are accepted one at a time. Each must deliver an 8-byte
//! handshake naming a worker id in `[0, N)` that has not connected yet;
//! any violation, an accept timeout, or a handshake read timeout aborts
//! startup.

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::capture::PipeSource;
use crate::config::TimeoutConfig;
use crate::lifecycle::interrupted;
use crate::orchestrator::record::WorkerRecord;
use crate::protocol::{validate_worker_id, Handshake, HandshakeCodec};
use crate::{AppError, Result};

/// Read one handshake from `stream`.
///
/// # Errors
///
/// Returns `AppError::Startup` on timeout or early close, and
/// `AppError::Protocol` if the bytes are not a valid handshake.
pub async fn read_handshake(
    stream: &mut TcpStream,
    timeout: std::time::Duration,
) -> Result<Handshake> {
    let mut framed = FramedRead::new(stream, HandshakeCodec);
    match tokio::time::timeout(timeout, framed.next()).await {
        Err(_elapsed) => Err(AppError::Startup(format!(
            "handshake not received within {}ms",
            timeout.as_millis()
        ))),
        Ok(None) => Err(AppError::Startup(
            "connection closed before handshake".into(),
        )),
        Ok(Some(handshake)) => handshake,
    }
}

/// Accept exactly one handshake per record and attach each connection to
/// the record named by its worker id.
///
/// # Errors
///
/// Returns `AppError::Startup` on an accept or handshake timeout, an
/// out-of-range or duplicate worker id, `AppError::Protocol` on a bad
/// handshake, and `AppError::Interrupted` if `cancel` fires.
pub async fn accept_handshakes<P: PipeSource>(
    listener: &TcpListener,
    records: &mut [WorkerRecord<P, TcpStream>],
    timeouts: &TimeoutConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let expected = records.len();
    let span = info_span!("accept_handshakes", workers = expected);

    async move {
        for accepted in 1..=expected {
            let (mut stream, peer) = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(interrupted("handshake acceptance")),
                result = tokio::time::timeout(timeouts.accept(), listener.accept()) => result
                    .map_err(|_| AppError::Startup(format!(
                        "timed out waiting for worker connection {accepted}/{expected}"
                    )))?
                    .map_err(|err| AppError::Startup(format!("accept failed: {err}")))?,
            };
            debug!(%peer, "worker connection accepted");

            let handshake = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(interrupted("handshake acceptance")),
                result = read_handshake(&mut stream, timeouts.handshake()) => result?,
            };

            let worker_id = handshake.worker_id;
            let idx = validate_worker_id(worker_id, expected).ok_or_else(|| {
                AppError::Startup(format!(
                    "handshake from {peer} names worker {worker_id}, outside 0..{expected}"
                ))
            })?;
            if !records[idx].attach(stream) {
                return Err(AppError::Startup(format!(
                    "duplicate handshake for worker {worker_id} from {peer}"
                )));
            }
            info!(worker_id, %peer, accepted, "worker handshake complete");
        }
        Ok(())
    }
    .instrument(span)
    .await
}
