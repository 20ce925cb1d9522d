//! Length-prefixed frame codec.
//!
//! Every message is an 8-byte big-endian length `L` followed by `L` bytes
//! of MessagePack. [`FrameAssembler`] reassembles frames out of arbitrary
//! byte chunks (it doesn't care whether those chunks arrived as raw TCP
//! reads or as WebSocket binary messages), and tolerates a frame whose
//! payload redundantly repeats the 8-byte length prefix — some peers do
//! this and the decoder is expected to shrug it off rather than choke.

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;

/// Refuse to buffer a frame larger than this. 16 MiB, per spec.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

const LEN_PREFIX_SIZE: usize = 8;

/// Encodes a single frame: an 8-byte big-endian length prefix followed by
/// `payload`. The result is meant to be written to the transport in one
/// shot (one WebSocket binary message, or one contiguous `write_all`).
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incrementally reassembles length-prefixed frames from chunks of bytes.
///
/// Feed it bytes as they arrive via [`FrameAssembler::push`], then drain
/// complete frames with [`FrameAssembler::next_frame`]. A single `push`
/// may unblock zero, one, or several frames.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Appends newly-received bytes to the internal buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pops one complete frame's payload out of the buffer, if one is
    /// available. Returns `Ok(None)` when more bytes are needed.
    ///
    /// Tolerates a payload that redundantly repeats the 8-byte length
    /// prefix inside itself: if, after stripping the outer prefix, the
    /// first 8 bytes of the payload again declare a length equal to the
    /// remaining payload length, that inner prefix is stripped too.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.buf.len() < LEN_PREFIX_SIZE {
            return Ok(None);
        }

        let declared_len = u64::from_be_bytes(self.buf[..LEN_PREFIX_SIZE].try_into().unwrap());
        if declared_len == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if declared_len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(declared_len, MAX_FRAME_LEN));
        }

        let total_len = LEN_PREFIX_SIZE + declared_len as usize;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX_SIZE);
        let mut payload = self.buf.split_to(declared_len as usize).to_vec();

        if payload.len() >= LEN_PREFIX_SIZE {
            let inner_len = u64::from_be_bytes(payload[..LEN_PREFIX_SIZE].try_into().unwrap());
            if inner_len as usize == payload.len() - LEN_PREFIX_SIZE {
                payload.drain(..LEN_PREFIX_SIZE);
            }
        }

        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_frame() {
        let mut asm = FrameAssembler::new();
        asm.push(&encode_frame(b"hello"));
        let frame = asm.next_frame().unwrap().unwrap();
        assert_eq!(frame, b"hello");
        assert!(asm.next_frame().unwrap().is_none());
    }

    #[test]
    fn reassembles_across_chunk_boundaries() {
        let encoded = encode_frame(b"a slightly longer payload here");
        let mut asm = FrameAssembler::new();
        for chunk in encoded.chunks(3) {
            asm.push(chunk);
        }
        let frame = asm.next_frame().unwrap().unwrap();
        assert_eq!(frame, b"a slightly longer payload here");
    }

    #[test]
    fn drains_multiple_queued_frames() {
        let mut asm = FrameAssembler::new();
        asm.push(&encode_frame(b"one"));
        asm.push(&encode_frame(b"two"));
        assert_eq!(asm.next_frame().unwrap().unwrap(), b"one");
        assert_eq!(asm.next_frame().unwrap().unwrap(), b"two");
        assert!(asm.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_zero_length_frame() {
        let mut asm = FrameAssembler::new();
        asm.push(&0u64.to_be_bytes());
        assert!(matches!(
            asm.next_frame(),
            Err(ProtocolError::EmptyFrame)
        ));
    }

    #[test]
    fn rejects_oversized_frame_without_disturbing_later_frames() {
        let mut asm = FrameAssembler::new();
        asm.push(&(MAX_FRAME_LEN + 1).to_be_bytes());
        assert!(matches!(
            asm.next_frame(),
            Err(ProtocolError::FrameTooLarge(_, _))
        ));
    }

    #[test]
    fn tolerates_a_redundant_inner_length_prefix() {
        let inner = encode_frame(b"payload");
        // The outer frame's payload IS an already-length-prefixed frame.
        let outer = encode_frame(&inner);
        let mut asm = FrameAssembler::new();
        asm.push(&outer);
        let frame = asm.next_frame().unwrap().unwrap();
        assert_eq!(frame, b"payload");
    }
}
