//! Length-prefixed message framing.
//!
//! On stream transports every message travels as one frame:
//!
//! ```text
//! +----------------------+------------------+
//! | length (u64, BE)     | payload          |
//! +----------------------+------------------+
//! ```
//!
//! Zero-length payloads are valid frames. The decoder is stateful: a frame
//! split across any number of reads is reassembled, and the decoder keeps
//! its position between calls while the caller waits for more bytes.

use bytes::{BufMut, Bytes, BytesMut};
use spine_core::buffer::SegmentedBuffer;
use spine_core::error::{Result, SpineError};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 8;

/// Append one frame carrying `payload` to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(FRAME_HEADER_LEN + payload.len());
    dst.put_u64(payload.len() as u64);
    dst.extend_from_slice(payload);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the 8-byte length prefix
    Header,
    /// Prefix consumed, waiting for this many payload bytes
    Body(usize),
}

/// Stateful frame decoder
///
/// Fast path:
/// - Whole payload inside one read chunk → zero-copy slice
///
/// Slow path:
/// - Payload spans chunks → copied into one contiguous buffer
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    max_size: Option<usize>,
}

impl FrameDecoder {
    /// Decoder rejecting frames that declare more than `max_size` bytes.
    #[must_use]
    pub const fn new(max_size: Option<usize>) -> Self {
        Self {
            state: DecodeState::Header,
            max_size,
        }
    }

    /// Decode the next complete message from `src`.
    ///
    /// Returns `Ok(None)` if more bytes are needed; nothing is lost, the
    /// call can simply be repeated after more data is pushed.
    ///
    /// # Errors
    ///
    /// `MessageTooLarge` (kind `MalformedFrame`) when the length prefix
    /// exceeds the configured maximum or the address space. The stream is
    /// unusable afterwards.
    pub fn decode(&mut self, src: &mut SegmentedBuffer) -> Result<Option<Bytes>> {
        if self.state == DecodeState::Header {
            let Some(declared) = src.take_u64() else {
                return Ok(None);
            };
            let len = self.check_len(declared)?;
            self.state = DecodeState::Body(len);
        }

        let DecodeState::Body(len) = self.state else {
            return Ok(None);
        };
        match src.take_bytes(len) {
            Some(payload) => {
                self.state = DecodeState::Header;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Whether a partially received frame is pending.
    #[must_use]
    pub fn in_frame(&self) -> bool {
        matches!(self.state, DecodeState::Body(_))
    }

    fn check_len(&self, declared: u64) -> Result<usize> {
        let limit = self.max_size.unwrap_or(usize::MAX);
        match usize::try_from(declared) {
            Ok(len) if len <= limit => Ok(len),
            _ => Err(SpineError::MessageTooLarge {
                size: declared,
                max: limit,
            }),
        }
    }
}
