//! Scalability-protocol socket types and socket domains.
//!
//! `SocketType` names the messaging pattern a socket speaks. Each type maps to
//! the 16-bit protocol id exchanged in the SP connection header, which is how
//! two peers decide whether they can talk to each other.

use std::fmt;

/// Messaging pattern of a socket.
///
/// The discriminant is the SP protocol id carried in the connection header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SocketType {
    /// Broadcasts every message to all connected subscribers
    Pub = 32,

    /// Receives the published messages that match its topic filters
    Sub = 33,

    /// Sends a request and waits for the matching reply
    Req = 48,

    /// Receives requests and answers the peer each came from
    Rep = 49,

    /// Load-balances messages across connected pullers
    Push = 80,

    /// Fair-queues messages from connected pushers
    Pull = 81,

    /// Many-to-many: every message goes to every directly connected peer
    Bus = 112,
}

impl SocketType {
    /// All socket types, in protocol id order.
    pub const ALL: [SocketType; 7] = [
        Self::Pub,
        Self::Sub,
        Self::Req,
        Self::Rep,
        Self::Push,
        Self::Pull,
        Self::Bus,
    ];

    /// Get the socket type as a string name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pub => "PUB",
            Self::Sub => "SUB",
            Self::Req => "REQ",
            Self::Rep => "REP",
            Self::Push => "PUSH",
            Self::Pull => "PULL",
            Self::Bus => "BUS",
        }
    }

    /// SP protocol id sent in the connection header.
    #[must_use]
    pub const fn protocol_id(&self) -> u16 {
        *self as u16
    }

    /// Resolve a protocol id received from a peer.
    #[must_use]
    pub fn from_protocol_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.protocol_id() == id)
    }

    /// Check if this socket type is compatible with the given peer type.
    #[must_use]
    pub const fn is_compatible(&self, peer: SocketType) -> bool {
        matches!(
            (self, peer),
            (Self::Pub, Self::Sub)
                | (Self::Sub, Self::Pub)
                | (Self::Req, Self::Rep)
                | (Self::Rep, Self::Req)
                | (Self::Push, Self::Pull)
                | (Self::Pull, Self::Push)
                | (Self::Bus, Self::Bus)
        )
    }

    /// Whether `send` is part of this pattern.
    #[must_use]
    pub const fn can_send(&self) -> bool {
        !matches!(self, Self::Sub | Self::Pull)
    }

    /// Whether `recv` is part of this pattern.
    #[must_use]
    pub const fn can_recv(&self) -> bool {
        !matches!(self, Self::Pub | Self::Push)
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Address family a socket is created in.
///
/// `Sp` sockets may use every transport. `Local` sockets stay inside the
/// process and only accept `inproc://` endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Domain {
    /// Inter-process: inproc, ipc and tcp endpoints
    #[default]
    Sp,
    /// Process-local: inproc endpoints only
    Local,
}

impl Domain {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sp => "AF_SP",
            Self::Local => "AF_LOCAL",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
