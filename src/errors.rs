//! Error types shared across the orchestrator and the worker agent.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or socket I/O failure.
    Io(String),
    /// Malformed or unattributable wire unit.
    Protocol(String),
    /// Orchestrator startup fault: ports, accept, handshake.
    Startup(String),
    /// Agent or task process could not be spawned.
    Spawn(String),
    /// Fatal control-plane failure on the agent side.
    Agent(String),
    /// Local output pipe failure.
    Pipe(String),
    /// Operator interrupt or termination signal.
    Interrupted(String),
}

impl AppError {
    /// Process exit status conventionally associated with this error.
    ///
    /// Interrupts map to `130` (128 + SIGINT); every other failure maps to `1`.
    #[must_use]
    pub fn exit_status(&self) -> u8 {
        match self {
            Self::Interrupted(_) => 130,
            _ => 1,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Agent(msg) => write!(f, "agent: {msg}"),
            Self::Pipe(msg) => write!(f, "pipe: {msg}"),
            Self::Interrupted(msg) => write!(f, "interrupted: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
