//! Buffer sizes and transport constants.

/// Bytes requested per read on a stream transport.
pub const DEFAULT_READ_BUF_SIZE: usize = 8 * 1024;

/// Initial capacity of a connection's encode buffer.
pub const DEFAULT_WRITE_BUF_SIZE: usize = 8 * 1024;

/// Largest inbound message accepted unless configured otherwise.
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024 * 1024;

/// Messages in flight on one direction of an inproc link.
///
/// A stalled peer fills this quickly, so the sender's pipe queue sees
/// backpressure the way a full kernel buffer causes it on TCP.
pub const INPROC_LINK_CAPACITY: usize = 16;

/// Per-connection I/O buffer sizes.
///
/// ```rust
/// use spine_core::config::BufferConfig;
///
/// assert_eq!(BufferConfig::uniform(2048).write_buf_size, 2048);
/// assert!(BufferConfig::small().read_buf_size < BufferConfig::large().read_buf_size);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub read_buf_size: usize,
    pub write_buf_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_buf_size: DEFAULT_READ_BUF_SIZE,
            write_buf_size: DEFAULT_WRITE_BUF_SIZE,
        }
    }
}

impl BufferConfig {
    /// Same size for reads and writes.
    #[must_use]
    pub const fn uniform(size: usize) -> Self {
        Self {
            read_buf_size: size,
            write_buf_size: size,
        }
    }

    /// Request/reply traffic with sub-kilobyte messages.
    #[must_use]
    pub const fn small() -> Self {
        Self::uniform(4 * 1024)
    }

    /// Pipelines moving bulk payloads.
    #[must_use]
    pub const fn large() -> Self {
        Self::uniform(16 * 1024)
    }
}
