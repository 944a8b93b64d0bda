//! Sequential port probing for the control and data planes.
//!
//! The TCP listener takes the first bindable port in the configured range;
//! the UDP socket then takes the first bindable port strictly above it, so
//! the two can never collide.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, UdpSocket};
use tracing::{debug, info};

use crate::config::PortRange;
use crate::{AppError, Result};

/// Ports chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    /// Control-plane listener port.
    pub tcp: u16,
    /// Data-plane socket port.
    pub udp: u16,
}

/// Bind the first free TCP port in `[start, end]` on the loopback interface.
///
/// # Errors
///
/// Returns [`AppError::Startup`] if every port in the range is taken.
pub async fn probe_tcp(start: u16, end: u16) -> Result<(TcpListener, u16)> {
    probe(start, end, "tcp", |addr| async move { TcpListener::bind(addr).await }).await
}

/// Bind the first free UDP port in `[start, end]` on the loopback interface.
///
/// # Errors
///
/// Returns [`AppError::Startup`] if every port in the range is taken.
pub async fn probe_udp(start: u16, end: u16) -> Result<(UdpSocket, u16)> {
    probe(start, end, "udp", |addr| async move { UdpSocket::bind(addr).await }).await
}

/// Bind both sockets: TCP from `range.range_start`, UDP from the TCP port + 1.
///
/// # Errors
///
/// Returns [`AppError::Startup`] if either probe exhausts the range.
pub async fn bind_ports(range: &PortRange) -> Result<(TcpListener, UdpSocket, Ports)> {
    let (listener, tcp) = probe_tcp(range.range_start, range.range_end).await?;
    let udp_start = tcp.checked_add(1).ok_or_else(|| {
        AppError::Startup(format!("no port left above tcp port {tcp} for udp"))
    })?;
    let (socket, udp) = probe_udp(udp_start, range.range_end).await?;

    info!(tcp, udp, "ports bound");
    Ok((listener, socket, Ports { tcp, udp }))
}

async fn probe<S, F, Fut>(start: u16, end: u16, proto: &str, bind: F) -> Result<(S, u16)>
where
    F: Fn(SocketAddr) -> Fut,
    Fut: std::future::Future<Output = io::Result<S>>,
{
    for port in start..=end {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match bind(addr).await {
            Ok(socket) => {
                debug!(proto, port, "bound");
                return Ok((socket, port));
            }
            Err(err) => debug!(proto, port, %err, "port unavailable"),
        }
    }
    Err(AppError::Startup(format!(
        "no free {proto} port in range {start}-{end}"
    )))
}
