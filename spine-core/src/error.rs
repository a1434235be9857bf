//! Spine Error Types
//!
//! Every failure that crosses the socket API is a `SpineError`; callers that
//! only care about the category match on [`SpineError::kind`].

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::endpoint::EndpointError;
use crate::socket_type::SocketType;

/// Category of a [`SpineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed endpoint address, bad option value, operation the pattern lacks
    InvalidArgument,
    /// Option not applicable to the socket's pattern
    UnsupportedOption,
    /// REQ/REP call made in the wrong state
    FsmViolation,
    /// Non-blocking call with no data or capacity
    WouldBlock,
    /// Peer or transport gone
    ConnectionClosed,
    /// Operation on a closed socket
    SocketClosed,
    /// Socket handle closed twice
    AlreadyClosed,
    /// Oversized or corrupt length prefix
    MalformedFrame,
    /// Bounded wait expired
    Timeout,
    /// Synchronous OS failure (bind, descriptor creation)
    Io,
}

/// Main error type for spine operations
#[derive(Error, Debug)]
pub enum SpineError {
    /// Argument rejected before anything happened
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Endpoint address could not be parsed
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] EndpointError),

    /// Option does not apply to this socket type
    #[error("Option {option} is not supported by {socket_type} sockets")]
    UnsupportedOption {
        option: &'static str,
        socket_type: SocketType,
    },

    /// Operation is not part of this socket's pattern
    #[error("{operation} is not supported by {socket_type} sockets")]
    UnsupportedOperation {
        operation: &'static str,
        socket_type: SocketType,
    },

    /// REQ/REP state machine violation
    #[error("Operation not valid in current state: {0}")]
    FsmViolation(&'static str),

    #[error("Operation would block")]
    WouldBlock,

    /// Peer disconnected or the link was torn down
    #[error("Connection closed")]
    ConnectionClosed,

    /// Socket closed
    #[error("Socket closed")]
    SocketClosed,

    #[error("Socket already closed")]
    AlreadyClosed,

    /// Frame header could not be accepted
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Message too large
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: usize },

    /// SP connection header rejected
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for spine operations
pub type Result<T> = std::result::Result<T, SpineError>;

impl SpineError {
    /// Create an invalid argument error with a message
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a malformed frame error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create a handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        Self::Handshake(msg.into())
    }

    /// Category used at the API boundary.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::Endpoint(_) | Self::UnsupportedOperation { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::UnsupportedOption { .. } => ErrorKind::UnsupportedOption,
            Self::FsmViolation(_) => ErrorKind::FsmViolation,
            Self::WouldBlock => ErrorKind::WouldBlock,
            Self::ConnectionClosed | Self::Handshake(_) => ErrorKind::ConnectionClosed,
            Self::SocketClosed => ErrorKind::SocketClosed,
            Self::AlreadyClosed => ErrorKind::AlreadyClosed,
            Self::MalformedFrame(_) | Self::MessageTooLarge { .. } => ErrorKind::MalformedFrame,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Io(e) => match e.kind() {
                io::ErrorKind::WouldBlock => ErrorKind::WouldBlock,
                io::ErrorKind::TimedOut => ErrorKind::Timeout,
                _ => ErrorKind::Io,
            },
        }
    }

    /// Check if retrying the same call may succeed
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            Self::WouldBlock | Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// Check if this error means a link is gone
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::ConnectionClosed | Self::Handshake(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    /// Protocol violations that must reach the caller
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame(_) | Self::MessageTooLarge { .. } | Self::FsmViolation(_)
        )
    }
}

impl From<SpineError> for io::Error {
    fn from(err: SpineError) -> Self {
        let kind = match err.kind() {
            ErrorKind::InvalidArgument | ErrorKind::UnsupportedOption => {
                io::ErrorKind::InvalidInput
            }
            ErrorKind::FsmViolation | ErrorKind::AlreadyClosed => io::ErrorKind::Other,
            ErrorKind::WouldBlock => io::ErrorKind::WouldBlock,
            ErrorKind::ConnectionClosed => io::ErrorKind::ConnectionAborted,
            ErrorKind::SocketClosed => io::ErrorKind::NotConnected,
            ErrorKind::MalformedFrame => io::ErrorKind::InvalidData,
            ErrorKind::Timeout => io::ErrorKind::TimedOut,
            ErrorKind::Io => match err {
                SpineError::Io(inner) => return inner,
                _ => io::ErrorKind::Other,
            },
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SpineError::WouldBlock.kind(), ErrorKind::WouldBlock);
        assert_eq!(
            SpineError::FsmViolation("awaiting reply").kind(),
            ErrorKind::FsmViolation
        );
        assert_eq!(
            SpineError::MessageTooLarge { size: 10, max: 4 }.kind(),
            ErrorKind::MalformedFrame
        );
        assert_eq!(
            SpineError::UnsupportedOperation {
                operation: "recv",
                socket_type: SocketType::Pub
            }
            .kind(),
            ErrorKind::InvalidArgument
        );
        let timed_out = SpineError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(timed_out.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_predicates() {
        assert!(SpineError::WouldBlock.is_recoverable());
        assert!(!SpineError::SocketClosed.is_recoverable());
        assert!(SpineError::ConnectionClosed.is_connection_error());
        assert!(SpineError::malformed("bad").is_protocol_error());
        assert!(!SpineError::Timeout(Duration::from_millis(5)).is_protocol_error());
    }

    #[test]
    fn test_into_io_error() {
        let err: io::Error = SpineError::WouldBlock.into();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let original = io::Error::new(io::ErrorKind::AddrInUse, "taken");
        let err: io::Error = SpineError::Io(original).into();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }
}
