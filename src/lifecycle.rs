//! Socket ownership and interrupt-driven shutdown.
//!
//! Sockets that must never outlive an aborted run are held in a
//! [`SocketRegistry`]. Each handle sits in a [`Slot`] that only moves
//! forward (`Empty → Open → Closed`), so releasing the registry twice, or
//! from both the normal and the interrupt path, closes every handle exactly
//! once.
//!
//! Operator signals do not touch sockets directly. [`install_signal_listener`]
//! turns SIGINT, SIGTERM, SIGQUIT, and SIGHUP into a cancelled
//! [`CancellationToken`]; every blocking wait selects on that token and the
//! owner of the registry performs the cleanup.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

// ── Slot ─────────────────────────────────────────────────────────────────────

/// Ownership state of one registered handle.
#[derive(Debug, Default)]
pub enum Slot<T> {
    /// Nothing registered yet.
    #[default]
    Empty,
    /// Handle is live.
    Open(T),
    /// Handle was released; terminal.
    Closed,
}

impl<T> Slot<T> {
    /// Borrow the live handle.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Open(handle) => Some(handle),
            Self::Empty | Self::Closed => None,
        }
    }

    /// Whether the slot reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    fn open(&mut self, handle: T) -> Result<()> {
        match self {
            Self::Empty => {
                *self = Self::Open(handle);
                Ok(())
            }
            Self::Open(_) => Err(AppError::Io("socket slot already occupied".into())),
            Self::Closed => Err(AppError::Io("socket slot already closed".into())),
        }
    }

    /// Drop the live handle, if any. Returns `true` if a handle was closed.
    fn close(&mut self) -> bool {
        let was_open = matches!(self, Self::Open(_));
        *self = Self::Closed;
        was_open
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Explicit owner of the active control-plane (`T`) and data-plane (`U`)
/// sockets of one process.
#[derive(Debug)]
pub struct SocketRegistry<T, U> {
    tcp: Slot<T>,
    udp: Slot<U>,
}

impl<T, U> Default for SocketRegistry<T, U> {
    fn default() -> Self {
        Self {
            tcp: Slot::Empty,
            udp: Slot::Empty,
        }
    }
}

impl<T, U> SocketRegistry<T, U> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the control-plane socket.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if a TCP socket was already registered or
    /// the registry was released.
    pub fn register_tcp(&mut self, socket: T) -> Result<()> {
        self.tcp.open(socket)
    }

    /// Register the data-plane socket.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if a UDP socket was already registered or
    /// the registry was released.
    pub fn register_udp(&mut self, socket: U) -> Result<()> {
        self.udp.open(socket)
    }

    /// Live control-plane socket.
    #[must_use]
    pub fn tcp(&self) -> Option<&T> {
        self.tcp.get()
    }

    /// Live data-plane socket.
    #[must_use]
    pub fn udp(&self) -> Option<&U> {
        self.udp.get()
    }

    /// Close the control-plane socket only.
    pub fn release_tcp(&mut self) {
        if self.tcp.close() {
            debug!("tcp socket released");
        }
    }

    /// Close every registered socket. Idempotent.
    pub fn release_all(&mut self) {
        let tcp = self.tcp.close();
        let udp = self.udp.close();
        if tcp || udp {
            debug!(tcp, udp, "socket registry released");
        }
    }

    /// Whether both slots reached their terminal state.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.tcp.is_closed() && self.udp.is_closed()
    }
}

// ── Signals ─────────────────────────────────────────────────────────────────

/// Register interrupt and termination handlers that cancel `cancel`.
///
/// Handlers are registered before this function returns, so a signal
/// delivered afterwards is never lost. The returned task ends after the
/// first signal or once `cancel` is cancelled by someone else.
///
/// # Errors
///
/// Returns [`AppError::Io`] if a handler cannot be registered.
pub fn install_signal_listener(cancel: CancellationToken) -> Result<JoinHandle<()>> {
    use nix::sys::signal::Signal;
    use tokio::signal::unix::{signal, SignalKind};

    let register = |kind: SignalKind, name: Signal| {
        signal(kind).map_err(|err| {
            AppError::Io(format!("failed to register {} handler: {err}", name.as_str()))
        })
    };

    let mut interrupt = register(SignalKind::interrupt(), Signal::SIGINT)?;
    let mut terminate = register(SignalKind::terminate(), Signal::SIGTERM)?;
    let mut quit = register(SignalKind::quit(), Signal::SIGQUIT)?;
    let mut hangup = register(SignalKind::hangup(), Signal::SIGHUP)?;

    Ok(tokio::spawn(async move {
        let caught = tokio::select! {
            _ = interrupt.recv() => Signal::SIGINT,
            _ = terminate.recv() => Signal::SIGTERM,
            _ = quit.recv() => Signal::SIGQUIT,
            _ = hangup.recv() => Signal::SIGHUP,
            () = cancel.cancelled() => {
                debug!("signal listener stopped");
                return;
            }
        };
        warn!(signal = caught.as_str(), "caught signal, aborting and releasing resources");
        cancel.cancel();
    }))
}

/// Error returned when a wait is cut short by `cancel`.
#[must_use]
pub fn interrupted(during: &str) -> AppError {
    info!(during, "operation interrupted");
    AppError::Interrupted(format!("cancelled during {during}"))
}
