//! Wire protocol shared by the orchestrator and its worker agents.
//!
//! Two channels carry fixed-size, little-endian records:
//!
//! - `message`: the [`Handshake`] sent once per worker over TCP, and the
//!   [`LifecycleMessage`] sent as one UDP datagram per message.
//! - `codec`: [`tokio_util::codec`] framing for the TCP handshake stream.
//!
//! Both records start with [`MAGIC`]; a unit with any other magic is void.

pub mod codec;
pub mod message;

pub use codec::HandshakeCodec;
pub use message::{
    validate_worker_id, DecodeError, Handshake, LifecycleMessage, MessageKind, WorkerId,
    HANDSHAKE_LEN, LIFECYCLE_LEN, MAGIC,
};
