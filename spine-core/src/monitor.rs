//! Socket event monitoring.
//!
//! A socket fans its lifecycle events out to every registered monitor
//! channel. Monitors that have been dropped are pruned on the next emit.

use crate::endpoint::Endpoint;
use std::fmt;
use std::time::Duration;

/// Socket lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A bind endpoint is listening.
    Bound(Endpoint),

    /// A bind endpoint accepted a peer.
    Accepted { endpoint: Endpoint, peer: String },

    /// A connect endpoint established a connection.
    Connected { endpoint: Endpoint, peer: String },

    /// A dial attempt failed and will be retried after `delay`.
    ConnectRetried {
        endpoint: Endpoint,
        delay: Duration,
        reason: String,
    },

    /// A peer rejected the SP header or speaks an incompatible pattern.
    HandshakeFailed { endpoint: Endpoint, reason: String },

    /// A connection was torn down.
    Disconnected { endpoint: Endpoint, peer: String },

    /// An endpoint was removed by unbind/disconnect.
    EndpointRemoved(Endpoint),

    /// The socket was closed.
    Closed,
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound(ep) => write!(f, "Bound to {ep}"),
            Self::Accepted { endpoint, peer } => {
                write!(f, "Accepted connection from {peer} on {endpoint}")
            }
            Self::Connected { endpoint, peer } => write!(f, "Connected to {endpoint} ({peer})"),
            Self::ConnectRetried {
                endpoint,
                delay,
                reason,
            } => write!(f, "Connect to {endpoint} failed ({reason}), retrying in {delay:?}"),
            Self::HandshakeFailed { endpoint, reason } => {
                write!(f, "Handshake failed on {endpoint}: {reason}")
            }
            Self::Disconnected { endpoint, peer } => {
                write!(f, "Disconnected from {peer} on {endpoint}")
            }
            Self::EndpointRemoved(ep) => write!(f, "Removed endpoint {ep}"),
            Self::Closed => f.write_str("Socket closed"),
        }
    }
}

/// Handle for receiving socket events.
pub type SocketMonitor = flume::Receiver<SocketEvent>;

/// Sending half held by the socket.
pub type SocketEventSender = flume::Sender<SocketEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (SocketEventSender, SocketMonitor) {
    flume::unbounded()
}

/// The set of monitors attached to one socket.
#[derive(Debug, Default)]
pub struct MonitorHub {
    senders: Vec<SocketEventSender>,
}

impl MonitorHub {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            senders: Vec::new(),
        }
    }

    /// Register a new monitor and return its receiving end.
    pub fn subscribe(&mut self) -> SocketMonitor {
        let (tx, rx) = create_monitor();
        self.senders.push(tx);
        rx
    }

    /// Deliver `event` to every live monitor.
    pub fn emit(&mut self, event: SocketEvent) {
        if self.senders.is_empty() {
            return;
        }
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Deliver a last event and disconnect every monitor. Nothing emitted
    /// afterwards reaches them.
    pub fn finish(&mut self, event: SocketEvent) {
        self.emit(event);
        self.senders.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
