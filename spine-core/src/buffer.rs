//! Segmented read buffer for stream decoders.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// Queue of received `Bytes` chunks.
///
/// Stream transports push each chunk they read; the frame decoder pulls
/// headers and payloads back out. A payload that sits inside a single chunk
/// is returned without copying (a refcount bump on the chunk); one that spans
/// chunks is copied into a contiguous buffer.
#[derive(Debug, Default)]
pub struct SegmentedBuffer {
    segs: VecDeque<Bytes>,
    len: usize,
}

impl SegmentedBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segs: VecDeque::new(),
            len: 0,
        }
    }

    /// Buffered byte count.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn push(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segs.push_back(bytes);
    }

    /// Copy the first `dst.len()` bytes into `dst` without consuming them.
    ///
    /// Returns `false` if not enough bytes are buffered.
    pub fn peek_into(&self, dst: &mut [u8]) -> bool {
        if dst.len() > self.len {
            return false;
        }

        let mut filled = 0;
        for seg in &self.segs {
            if filled == dst.len() {
                break;
            }
            let take = (dst.len() - filled).min(seg.len());
            dst[filled..filled + take].copy_from_slice(&seg[..take]);
            filled += take;
        }
        true
    }

    /// Consume a big-endian `u64` from the front.
    pub fn take_u64(&mut self) -> Option<u64> {
        let mut raw = [0u8; 8];
        if !self.peek_into(&mut raw) {
            return None;
        }
        self.advance(8);
        Some(u64::from_be_bytes(raw))
    }

    /// Drop `n` bytes from the front (clamped to the buffered length).
    pub fn advance(&mut self, n: usize) {
        let mut n = n.min(self.len);
        self.len -= n;

        while n > 0 {
            let Some(mut front) = self.segs.pop_front() else {
                break;
            };
            if n >= front.len() {
                n -= front.len();
                continue;
            }
            front.advance(n);
            self.segs.push_front(front);
            break;
        }
    }

    /// Take exactly `n` bytes from the front, or `None` if fewer are buffered.
    pub fn take_bytes(&mut self, n: usize) -> Option<Bytes> {
        if n == 0 {
            return Some(Bytes::new());
        }
        if n > self.len {
            return None;
        }

        if let Some(front) = self.segs.front_mut() {
            if front.len() >= n {
                self.len -= n;
                let out = front.split_to(n);
                if front.is_empty() {
                    self.segs.pop_front();
                }
                return Some(out);
            }
        }

        // Spans segments: copy.
        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(mut seg) = self.segs.pop_front() else {
                break;
            };
            let take = (n - out.len()).min(seg.len());
            out.extend_from_slice(&seg[..take]);
            self.len -= take;
            if take < seg.len() {
                seg.advance(take);
                self.segs.push_front(seg);
            }
        }

        Some(out.freeze())
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.segs.clear();
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_within_single_segment() {
        let mut buf = SegmentedBuffer::new();
        buf.push(Bytes::from_static(b"hello world"));

        assert_eq!(buf.take_bytes(5).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.take_bytes(6).unwrap(), Bytes::from_static(b" world"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_across_segments() {
        let mut buf = SegmentedBuffer::new();
        buf.push(Bytes::from_static(b"ab"));
        buf.push(Bytes::from_static(b"cd"));
        buf.push(Bytes::from_static(b"ef"));

        assert_eq!(buf.take_bytes(5).unwrap(), Bytes::from_static(b"abcde"));
        assert_eq!(buf.len(), 1);
        assert!(buf.take_bytes(2).is_none());
    }

    #[test]
    fn test_take_u64_split_header() {
        let raw = 300u64.to_be_bytes();
        let mut buf = SegmentedBuffer::new();
        buf.push(Bytes::copy_from_slice(&raw[..3]));
        assert_eq!(buf.take_u64(), None);
        assert_eq!(buf.len(), 3);

        buf.push(Bytes::copy_from_slice(&raw[3..]));
        assert_eq!(buf.take_u64(), Some(300));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_push_is_ignored() {
        let mut buf = SegmentedBuffer::new();
        buf.push(Bytes::new());
        assert!(buf.is_empty());
        assert_eq!(buf.take_bytes(0), Some(Bytes::new()));
    }
}
