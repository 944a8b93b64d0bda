//! Handshake and lifecycle wire records.
//!
//! # Layout
//!
//! Handshake (8 bytes):
//!
//! | Offset | Field       | Type  |
//! |--------|-------------|-------|
//! | 0      | `magic`     | `u32` |
//! | 4      | `worker_id` | `i32` |
//!
//! Lifecycle message (24 bytes):
//!
//! | Offset | Field       | Type                               |
//! |--------|-------------|------------------------------------|
//! | 0      | `magic`     | `u32`                              |
//! | 4      | `type`      | `i32`                              |
//! | 8      | `worker_id` | `i32`                              |
//! | 12     | padding     | 4 zero bytes                       |
//! | 16     | payload     | `u64` or `i32` + 4 zero bytes      |
//!
//! All integers are little-endian.

use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut};

/// Magic number that prefixes every handshake and lifecycle record.
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Encoded size of a [`Handshake`].
pub const HANDSHAKE_LEN: usize = 8;

/// Encoded size of a [`LifecycleMessage`].
pub const LIFECYCLE_LEN: usize = 24;

/// Worker identifier as carried on the wire.
pub type WorkerId = i32;

const TYPE_UPDATE: i32 = 0;
const TYPE_TASK_DONE: i32 = 1;
const TYPE_TASK_INIT: i32 = 2;
const TYPE_SHUTDOWN: i32 = 3;
const TYPE_CRASH: i32 = 4;

const PAYLOAD_OFFSET: usize = 16;

/// Why an inbound wire unit was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed record size.
    Undersized {
        /// Bytes actually received.
        actual: usize,
        /// Bytes required.
        expected: usize,
    },
    /// Leading magic did not match [`MAGIC`].
    BadMagic(u32),
    /// Well-formed record with a type this build does not know.
    UnknownType {
        /// Worker that sent the record.
        worker_id: WorkerId,
        /// Raw type discriminant.
        raw: i32,
    },
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undersized { actual, expected } => {
                write!(f, "undersized unit: {actual} of {expected} bytes")
            }
            Self::BadMagic(magic) => write!(f, "bad magic {magic:#010x}"),
            Self::UnknownType { worker_id, raw } => {
                write!(f, "unknown message type {raw} from worker {worker_id}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Check that `worker_id` lies in `[0, workers)`.
#[must_use]
pub fn validate_worker_id(worker_id: WorkerId, workers: usize) -> Option<usize> {
    usize::try_from(worker_id).ok().filter(|&idx| idx < workers)
}

// ── Handshake ────────────────────────────────────────────────────────────────

/// One-shot registration record sent by an agent over the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Identity the agent was launched with.
    pub worker_id: WorkerId,
}

impl Handshake {
    /// Create a handshake for `worker_id`.
    #[must_use]
    pub fn new(worker_id: WorkerId) -> Self {
        Self { worker_id }
    }

    /// Encode into the fixed 8-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0u8; HANDSHAKE_LEN];
        let mut dst = &mut out[..];
        dst.put_u32_le(MAGIC);
        dst.put_i32_le(self.worker_id);
        out
    }

    /// Decode from the front of `src`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Undersized`] or [`DecodeError::BadMagic`].
    pub fn decode(src: &[u8]) -> std::result::Result<Self, DecodeError> {
        if src.len() < HANDSHAKE_LEN {
            return Err(DecodeError::Undersized {
                actual: src.len(),
                expected: HANDSHAKE_LEN,
            });
        }
        let mut buf = src;
        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        Ok(Self {
            worker_id: buf.get_i32_le(),
        })
    }
}

// ── Lifecycle message ───────────────────────────────────────────────────────

/// Type-specific part of a lifecycle message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `bytes_written` new bytes are waiting in the worker's stdout.
    Update {
        /// Bytes produced since the previous successful update.
        bytes_written: u64,
    },
    /// The worker finished its task.
    TaskDone {
        /// Exit status of the task.
        status_code: i32,
    },
    /// The worker started a task.
    TaskInit {
        /// Task identifier.
        task_id: i32,
    },
    /// The worker is exiting normally.
    Shutdown,
    /// The worker hit a fatal error and is exiting.
    Crash,
}

impl MessageKind {
    fn discriminant(self) -> i32 {
        match self {
            Self::Update { .. } => TYPE_UPDATE,
            Self::TaskDone { .. } => TYPE_TASK_DONE,
            Self::TaskInit { .. } => TYPE_TASK_INIT,
            Self::Shutdown => TYPE_SHUTDOWN,
            Self::Crash => TYPE_CRASH,
        }
    }

    /// Short name used in log fields.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::TaskDone { .. } => "task_done",
            Self::TaskInit { .. } => "task_init",
            Self::Shutdown => "shutdown",
            Self::Crash => "crash",
        }
    }

    /// Whether this message ends the worker's liveness.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown | Self::Crash)
    }
}

/// Lifecycle message carried in a single UDP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleMessage {
    /// Sending worker.
    pub worker_id: WorkerId,
    /// Message type and payload.
    pub kind: MessageKind,
}

impl LifecycleMessage {
    /// Create a message from `worker_id`.
    #[must_use]
    pub fn new(worker_id: WorkerId, kind: MessageKind) -> Self {
        Self { worker_id, kind }
    }

    /// Encode into the fixed 24-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; LIFECYCLE_LEN] {
        let mut out = [0u8; LIFECYCLE_LEN];
        let mut dst = &mut out[..];
        dst.put_u32_le(MAGIC);
        dst.put_i32_le(self.kind.discriminant());
        dst.put_i32_le(self.worker_id);
        dst.put_u32_le(0);
        match self.kind {
            MessageKind::Update { bytes_written } => dst.put_u64_le(bytes_written),
            MessageKind::TaskDone { status_code } => dst.put_i32_le(status_code),
            MessageKind::TaskInit { task_id } => dst.put_i32_le(task_id),
            MessageKind::Shutdown | MessageKind::Crash => {}
        }
        out
    }

    /// Decode one datagram.
    ///
    /// Trailing bytes beyond [`LIFECYCLE_LEN`] are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Undersized`], [`DecodeError::BadMagic`], or
    /// [`DecodeError::UnknownType`]. The worker id is not range-checked here;
    /// see [`validate_worker_id`].
    pub fn decode(src: &[u8]) -> std::result::Result<Self, DecodeError> {
        if src.len() < LIFECYCLE_LEN {
            return Err(DecodeError::Undersized {
                actual: src.len(),
                expected: LIFECYCLE_LEN,
            });
        }
        let mut buf = src;
        let magic = buf.get_u32_le();
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let raw_type = buf.get_i32_le();
        let worker_id = buf.get_i32_le();

        let mut payload = &src[PAYLOAD_OFFSET..LIFECYCLE_LEN];
        let kind = match raw_type {
            TYPE_UPDATE => MessageKind::Update {
                bytes_written: payload.get_u64_le(),
            },
            TYPE_TASK_DONE => MessageKind::TaskDone {
                status_code: payload.get_i32_le(),
            },
            TYPE_TASK_INIT => MessageKind::TaskInit {
                task_id: payload.get_i32_le(),
            },
            TYPE_SHUTDOWN => MessageKind::Shutdown,
            TYPE_CRASH => MessageKind::Crash,
            raw => return Err(DecodeError::UnknownType { worker_id, raw }),
        };

        Ok(Self { worker_id, kind })
    }
}
