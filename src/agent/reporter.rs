//! Lifecycle reporting over the data plane.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use tracing::{debug, warn};

use crate::protocol::{LifecycleMessage, MessageKind, WorkerId, LIFECYCLE_LEN};
use crate::{AppError, Result};

/// Connected datagram channel to the orchestrator.
pub trait Transport {
    /// Send one datagram.
    ///
    /// # Errors
    ///
    /// Any I/O error counts as a failed send.
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<usize>;
}

/// UDP transport bound to an ephemeral loopback port and connected to the
/// orchestrator's data-plane port.
/// Loopback datagram sends never stall, so the socket is a plain std one.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind and connect to `127.0.0.1:<udp_port>`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Agent` if the socket cannot be bound or connected.
    pub fn connect(udp_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .map_err(|err| AppError::Agent(format!("udp bind failed: {err}")))?;
        socket
            .connect(SocketAddr::from((Ipv4Addr::LOCALHOST, udp_port)))
            .map_err(|err| AppError::Agent(format!("udp connect to port {udp_port} failed: {err}")))?;
        Ok(Self { socket })
    }
}

impl Transport for UdpTransport {
    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send(datagram)
    }
}

/// Tracks bytes produced since the last successful UPDATE and sends
/// lifecycle messages for one worker.
///
/// The unreported counter is reset only when an UPDATE is fully sent; a
/// failed send keeps it so the next update carries the accumulated count.
#[derive(Debug)]
pub struct ProgressReporter<T> {
    worker_id: WorkerId,
    transport: T,
    unreported: u64,
    reported: u64,
}

impl<T: Transport> ProgressReporter<T> {
    /// Reporter for `worker_id` over `transport`.
    #[must_use]
    pub fn new(worker_id: WorkerId, transport: T) -> Self {
        Self {
            worker_id,
            transport,
            unreported: 0,
            reported: 0,
        }
    }

    /// Account `bytes` newly written to the local pipe.
    pub fn record(&mut self, bytes: usize) {
        self.unreported = self.unreported.saturating_add(bytes as u64);
    }

    /// Bytes written but not yet acknowledged by a successful UPDATE.
    #[must_use]
    pub fn unreported(&self) -> u64 {
        self.unreported
    }

    /// Bytes covered by successful UPDATEs so far.
    #[must_use]
    pub fn reported(&self) -> u64 {
        self.reported
    }

    /// Send an UPDATE for the unreported bytes, if any.
    ///
    /// Returns `true` when nothing is left unreported.
    pub fn report_progress(&mut self) -> bool {
        if self.unreported == 0 {
            return true;
        }
        let bytes_written = self.unreported;
        match self.send(MessageKind::Update { bytes_written }) {
            Ok(()) => {
                self.reported += bytes_written;
                self.unreported = 0;
                true
            }
            Err(err) => {
                warn!(worker_id = self.worker_id, bytes_written, %err, "update not sent, retrying next cycle");
                false
            }
        }
    }

    /// Send one lifecycle message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the datagram was not sent in full.
    pub fn send(&mut self, kind: MessageKind) -> Result<()> {
        let datagram = LifecycleMessage::new(self.worker_id, kind).encode();
        let sent = self
            .transport
            .send_datagram(&datagram)
            .map_err(|err| AppError::Io(format!("{} send failed: {err}", kind.name())))?;
        if sent != LIFECYCLE_LEN {
            return Err(AppError::Io(format!(
                "{} send truncated: {sent} of {LIFECYCLE_LEN} bytes",
                kind.name()
            )));
        }
        debug!(worker_id = self.worker_id, kind = kind.name(), "lifecycle message sent");
        Ok(())
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
