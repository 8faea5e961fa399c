//! # Wire Codec
//!
//! Encodes and decodes [`CallFrame`] records to and from byte buffers.
//!
//! The encoding is a fixed-width header followed by a length-prefixed
//! payload, all little-endian:
//!
//! ```text
//! [u32 method id][u8 kind tag][u64 sequence number][u32 payload len][payload]
//! ```
//!
//! Because every variable-length field is preceded by its byte length, frames
//! can be split off a streaming source without look-ahead (see
//! [`decode_prefix`]). The encoding is byte-stable across processes and
//! machines: recovery on a different host must decode the log identically to
//! the host that wrote it, so nothing here depends on platform endianness or
//! layout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hard ceiling on a single frame's payload. Anything larger is treated as a
/// malformed frame rather than an allocation request.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// method id (4) + kind tag (1) + sequence number (8) + payload length (4).
const HEADER_LEN: usize = 17;

/// Identifies a callable method on an actor.
///
/// Method id tables are produced by marshaling stubs outside this crate; the
/// core only routes on the number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Monotonic call identity, unique per originating actor instance.
///
/// The sequence number is the sole key correlating an outbound call with its
/// eventual outcome, including across a checkpoint and restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeqNo(pub u64);

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a frame means to the dispatch loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    /// A call whose sender waits for an outcome frame carrying the same
    /// sequence number.
    Blocking,
    /// A call with no tracked outcome; never registered in the call cache.
    FireAndForget,
    /// Successful outcome for a previously issued blocking call.
    ReturnValue,
    /// Fault outcome for a previously issued blocking call.
    ExceptionReturn,
}

impl CallKind {
    fn tag(self) -> u8 {
        match self {
            CallKind::Blocking => 0,
            CallKind::FireAndForget => 1,
            CallKind::ReturnValue => 2,
            CallKind::ExceptionReturn => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CallKind::Blocking),
            1 => Some(CallKind::FireAndForget),
            2 => Some(CallKind::ReturnValue),
            3 => Some(CallKind::ExceptionReturn),
            _ => None,
        }
    }

    /// True for the two outcome kinds.
    pub fn is_outcome(self) -> bool {
        matches!(self, CallKind::ReturnValue | CallKind::ExceptionReturn)
    }
}

/// A single remote-call record on the wire and in the log.
///
/// For [`CallKind::Blocking`] and [`CallKind::FireAndForget`] the sequence
/// number belongs to the *sender's* counter. Outcome frames echo the sequence
/// number of the call they resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub method: MethodId,
    pub kind: CallKind,
    pub seq: SeqNo,
    pub payload: Vec<u8>,
}

/// Codec-level failures. All of these reject the single frame; none of them
/// stop the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("unknown call kind tag {0:#04x}")]
    UnknownKind(u8),
    #[error("payload length {0} exceeds limit of {MAX_PAYLOAD_LEN} bytes")]
    PayloadTooLarge(usize),
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}

/// Encodes a frame into a fresh buffer. Pure transform.
///
/// # Panics
///
/// Panics if the payload exceeds [`MAX_PAYLOAD_LEN`]. The bound is the same
/// one [`decode`] enforces, so any frame this function produces is
/// decodable by a peer, and the `u32` length prefix can never truncate.
pub fn encode(frame: &CallFrame) -> Vec<u8> {
    assert!(
        frame.payload.len() <= MAX_PAYLOAD_LEN,
        "payload length {} exceeds limit of {MAX_PAYLOAD_LEN} bytes",
        frame.payload.len()
    );
    let mut buf = Vec::with_capacity(HEADER_LEN + frame.payload.len());
    buf.extend_from_slice(&frame.method.0.to_le_bytes());
    buf.push(frame.kind.tag());
    buf.extend_from_slice(&frame.seq.0.to_le_bytes());
    buf.extend_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&frame.payload);
    buf
}

/// Decodes exactly one frame from a buffer that must contain exactly one
/// frame.
pub fn decode(buf: &[u8]) -> Result<CallFrame, CodecError> {
    let (frame, consumed) = parse(buf)?;
    if consumed != buf.len() {
        return Err(CodecError::TrailingBytes(buf.len() - consumed));
    }
    Ok(frame)
}

/// Streaming variant of [`decode`]: returns `Ok(None)` when the buffer holds
/// only a prefix of a frame, and the frame plus the number of bytes consumed
/// once enough bytes have arrived.
pub fn decode_prefix(buf: &[u8]) -> Result<Option<(CallFrame, usize)>, CodecError> {
    match parse(buf) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(CodecError::Truncated { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse(buf: &[u8]) -> Result<(CallFrame, usize), CodecError> {
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            have: buf.len(),
        });
    }

    let mut method = [0u8; 4];
    method.copy_from_slice(&buf[0..4]);
    let kind = CallKind::from_tag(buf[4]).ok_or(CodecError::UnknownKind(buf[4]))?;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&buf[5..13]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&buf[13..17]);

    let payload_len = u32::from_le_bytes(len) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(payload_len));
    }

    let total = HEADER_LEN + payload_len;
    if buf.len() < total {
        return Err(CodecError::Truncated {
            needed: total,
            have: buf.len(),
        });
    }

    let frame = CallFrame {
        method: MethodId(u32::from_le_bytes(method)),
        kind,
        seq: SeqNo(u64::from_le_bytes(seq)),
        payload: buf[HEADER_LEN..total].to_vec(),
    };
    Ok((frame, total))
}
