//! Orchestrator configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Name of the worker-agent binary shipped alongside the orchestrator.
pub const AGENT_BINARY: &str = "fleetwire-agent";

/// Inclusive port range probed at startup.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PortRange {
    /// First candidate port for the TCP listener.
    #[serde(default = "default_range_start")]
    pub range_start: u16,
    /// Last candidate port for either socket.
    #[serde(default = "default_range_end")]
    pub range_end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_end: default_range_end(),
        }
    }
}

fn default_range_start() -> u16 {
    4242
}

fn default_range_end() -> u16 {
    6969
}

/// Bounds on every blocking call, in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Wait for each incoming worker connection.
    #[serde(default = "default_accept_ms")]
    pub accept_ms: u64,
    /// Wait for the handshake bytes on an accepted connection.
    #[serde(default = "default_handshake_ms")]
    pub handshake_ms: u64,
    /// Wait for one datagram in the dispatch loop before polling again.
    #[serde(default = "default_udp_receive_ms")]
    pub udp_receive_ms: u64,
    /// Wait for announced bytes to show up in a worker's local pipe.
    #[serde(default = "default_pipe_drain_ms")]
    pub pipe_drain_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            accept_ms: default_accept_ms(),
            handshake_ms: default_handshake_ms(),
            udp_receive_ms: default_udp_receive_ms(),
            pipe_drain_ms: default_pipe_drain_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Accept timeout as a [`Duration`].
    #[must_use]
    pub fn accept(&self) -> Duration {
        Duration::from_millis(self.accept_ms)
    }

    /// Handshake read timeout as a [`Duration`].
    #[must_use]
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    /// Dispatch-loop receive timeout as a [`Duration`].
    #[must_use]
    pub fn udp_receive(&self) -> Duration {
        Duration::from_millis(self.udp_receive_ms)
    }

    /// Pipe drain deadline as a [`Duration`].
    #[must_use]
    pub fn pipe_drain(&self) -> Duration {
        Duration::from_millis(self.pipe_drain_ms)
    }
}

fn default_accept_ms() -> u64 {
    10_000
}

fn default_handshake_ms() -> u64 {
    10_000
}

fn default_udp_receive_ms() -> u64 {
    5_000
}

fn default_pipe_drain_ms() -> u64 {
    2_000
}

fn default_workers() -> usize {
    10
}

/// Fleet configuration parsed from `fleetwire.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FleetConfig {
    /// Number of worker agents to spawn.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Worker-agent executable; defaults to [`AGENT_BINARY`] next to the
    /// running executable.
    #[serde(default)]
    pub agent_program: Option<PathBuf>,
    /// Extra arguments appended after `<worker_id> <tcp_port> <udp_port>`.
    #[serde(default)]
    pub agent_args: Vec<String>,
    /// Candidate port range.
    #[serde(default)]
    pub ports: PortRange,
    /// Blocking-call bounds.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            agent_program: None,
            agent_args: Vec::new(),
            ports: PortRange::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the agent executable path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no program is configured and the
    /// current executable's directory cannot be determined.
    pub fn agent_program(&self) -> Result<PathBuf> {
        if let Some(ref program) = self.agent_program {
            return Ok(program.clone());
        }
        let exe = std::env::current_exe()
            .map_err(|err| AppError::Config(format!("cannot locate current executable: {err}")))?;
        let dir = exe
            .parent()
            .ok_or_else(|| AppError::Config("current executable has no parent directory".into()))?;
        Ok(dir.join(AGENT_BINARY))
    }

    /// Validate invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AppError::Config("workers must be greater than zero".into()));
        }
        if i32::try_from(self.workers).is_err() {
            return Err(AppError::Config(format!(
                "workers must fit a 32-bit worker id, got {}",
                self.workers
            )));
        }
        if self.ports.range_start == 0 {
            return Err(AppError::Config("ports.range_start must be non-zero".into()));
        }
        if self.ports.range_start >= self.ports.range_end {
            return Err(AppError::Config(format!(
                "ports.range_start ({}) must be below ports.range_end ({})",
                self.ports.range_start, self.ports.range_end
            )));
        }
        let timeouts = &self.timeouts;
        for (name, value) in [
            ("accept_ms", timeouts.accept_ms),
            ("handshake_ms", timeouts.handshake_ms),
            ("udp_receive_ms", timeouts.udp_receive_ms),
            ("pipe_drain_ms", timeouts.pipe_drain_ms),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!(
                    "timeouts.{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}
