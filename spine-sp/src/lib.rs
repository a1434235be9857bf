//! # Spine SP
//!
//! Scalability-protocol sockets over inproc, IPC and TCP.
//!
//! ## Overview
//!
//! Every socket is one [`SocketCore`](core::SocketCore): a set of live
//! connections (pipes), a pattern state machine, and the endpoints feeding
//! it. The supported patterns are:
//! - **REQ**: request/reply client with request ids and automatic resend
//! - **REP**: request/reply server, replies to the requester
//! - **PUB**: broadcast, never blocks, slow subscribers lose old messages
//! - **SUB**: prefix-filtered receive
//! - **PUSH**: round-robin load balancing with backpressure
//! - **PULL**: fair-queued receive
//! - **BUS**: all-to-all broadcast
//!
//! ## Layering
//!
//! - `codec` / `handshake`: wire format (8-byte length prefix, SP header)
//! - `transport`: framed reader/writer halves over streams and inproc links
//! - `pipe`: per-connection bounded queues and rotation cursors
//! - pattern modules and `pattern`: routing decisions, no I/O
//! - `endpoint`: acceptor and dialer threads
//! - `core`: locking, blocking adapters, readiness, shutdown
//! - `socket`: the public handle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spine_sp::prelude::*;
//!
//! # fn main() -> spine_core::error::Result<()> {
//! let inproc = InprocRegistry::new();
//! let pull = Socket::new(SocketType::Pull, Domain::Sp, inproc.clone())?;
//! pull.bind("tcp://127.0.0.1:5555")?;
//!
//! let push = Socket::new(SocketType::Push, Domain::Sp, inproc)?;
//! push.connect("tcp://127.0.0.1:5555")?;
//! push.send("job", Flags::NONE)?;
//! let job = pull.recv(Flags::NONE)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
// Allow some pedantic lints
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]

pub mod bus;
pub mod codec;
pub mod core;
pub mod endpoint;
pub mod handshake;
pub mod pattern;
pub mod pipe;
pub mod publisher;
pub mod pull;
pub mod push;
pub mod rep;
pub mod req;
pub mod socket;
pub mod subscriber;
pub mod transport;

pub use endpoint::{Direction, EndpointId};
pub use socket::{Flags, Socket};

/// Everything needed to create and drive sockets.
pub mod prelude {
    pub use crate::endpoint::{Direction, EndpointId};
    pub use crate::socket::{Flags, Socket};
    pub use bytes::Bytes;
    pub use spine_core::error::{ErrorKind, Result, SpineError};
    pub use spine_core::inproc::InprocRegistry;
    pub use spine_core::monitor::{SocketEvent, SocketMonitor};
    pub use spine_core::options::{SocketOption, SocketOptions};
    pub use spine_core::socket_type::{Domain, SocketType};
}
