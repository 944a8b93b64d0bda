//! Control-plane codec for the one-shot TCP handshake.
//!
//! Use [`HandshakeCodec`] with [`tokio_util::codec::FramedWrite`] on the
//! agent side and [`tokio_util::codec::FramedRead`] on the orchestrator
//! side. The stream carries exactly one [`HANDSHAKE_LEN`]-byte record.
//!
//! # Examples
//!
//! ```rust,ignore
//! use futures_util::SinkExt;
//! use tokio_util::codec::FramedWrite;
//! use fleetwire::protocol::{Handshake, HandshakeCodec};
//!
//! let mut framed = FramedWrite::new(&mut stream, HandshakeCodec);
//! framed.send(Handshake::new(3)).await?;
//! ```

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::message::{Handshake, HANDSHAKE_LEN};
use crate::{AppError, Result};

/// Fixed-length codec for [`Handshake`] records.
///
/// # Decoder
///
/// Buffers until [`HANDSHAKE_LEN`] bytes are available, then yields one
/// [`Handshake`]. A wrong magic returns [`AppError::Protocol`]. A stream
/// that closes mid-record returns [`AppError::Protocol`] from `decode_eof`.
///
/// # Encoder
///
/// Appends the 8-byte wire form to the output buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct HandshakeCodec;

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HANDSHAKE_LEN {
            src.reserve(HANDSHAKE_LEN - src.len());
            return Ok(None);
        }
        let record = src.split_to(HANDSHAKE_LEN);
        Handshake::decode(&record)
            .map(Some)
            .map_err(|err| AppError::Protocol(format!("handshake rejected: {err}")))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(handshake) => Ok(Some(handshake)),
            None if src.is_empty() => Ok(None),
            None => Err(AppError::Protocol(format!(
                "short handshake: stream closed after {} of {HANDSHAKE_LEN} bytes",
                src.len()
            ))),
        }
    }
}

impl Encoder<Handshake> for HandshakeCodec {
    type Error = AppError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_slice(&item.encode());
        Ok(())
    }
}
