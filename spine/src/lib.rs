//! # Spine
//!
//! A messaging engine for scalability-protocol sockets: REQ/REP, PUB/SUB,
//! PUSH/PULL and BUS over in-process, IPC and TCP transports.
//!
//! ## Architecture
//!
//! - **`spine-core`**: addresses, options, errors, monitor events, the inproc
//!   registry and other building blocks shared by every socket
//! - **`spine-sp`**: wire codec, handshake, pipes, pattern state machines and
//!   the blocking [`Socket`] handle
//! - **`spine`**: public API surface (this crate), including the handle-based
//!   [`Context`]
//!
//! ## Protocols (opt-in via features)
//!
//! - **`sp`** (default) - scalability-protocol sockets
//!
//! ## Quick Start
//!
//! ### Request/Reply
//!
//! ```rust,no_run
//! # #[cfg(feature = "sp")]
//! use spine::prelude::*;
//!
//! # #[cfg(feature = "sp")]
//! # fn example() -> spine::Result<()> {
//! let ctx = Context::new();
//! let server = ctx.create(SocketType::Rep, Domain::Sp)?;
//! ctx.bind(server, "tcp://127.0.0.1:5555")?;
//!
//! let client = ctx.create(SocketType::Req, Domain::Sp)?;
//! ctx.connect(client, "tcp://127.0.0.1:5555")?;
//!
//! ctx.send(client, "ping", Flags::NONE)?;
//! let request = ctx.recv(server, Flags::NONE)?;
//! ctx.send(server, request, Flags::NONE)?;
//! let reply = ctx.recv(client, Flags::NONE)?;
//! assert_eq!(reply, "ping");
//! # Ok(())
//! # }
//! ```
//!
//! ### Direct socket handles
//!
//! [`Socket`] can be used without a [`Context`]; clones share one socket.
//!
//! ```rust,no_run
//! # #[cfg(feature = "sp")]
//! use spine::prelude::*;
//!
//! # #[cfg(feature = "sp")]
//! # fn example() -> spine::Result<()> {
//! let inproc = InprocRegistry::new();
//! let publisher = Socket::new(SocketType::Pub, Domain::Sp, inproc.clone())?;
//! publisher.bind("inproc://ticks")?;
//!
//! let subscriber = Socket::new(SocketType::Sub, Domain::Sp, inproc)?;
//! subscriber.subscribe("eur.")?;
//! subscriber.connect("inproc://ticks")?;
//! publisher.send_str("eur.usd 1.08", Flags::NONE)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The engine logs through `tracing`. Install any subscriber, or call
//! [`dev_tracing::init_tracing`] to honour `RUST_LOG`.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export core types
pub use bytes::Bytes;
pub use spine_core::error::{ErrorKind, Result, SpineError};
pub use spine_core::inproc::InprocRegistry;
pub use spine_core::monitor::{SocketEvent, SocketMonitor};
pub use spine_core::options::{SocketOption, SocketOptions};
pub use spine_core::socket_type::{Domain, SocketType};

pub mod dev_tracing;

// Protocol modules (opt-in via features)
#[cfg(feature = "sp")]
pub mod context;

#[cfg(feature = "sp")]
pub use context::{Context, SocketHandle};
#[cfg(feature = "sp")]
pub use spine_sp::{Direction, EndpointId, Flags, Socket};

/// Everything needed to create and drive sockets.
pub mod prelude {
    pub use crate::{
        Bytes, Domain, ErrorKind, InprocRegistry, Result, SocketEvent, SocketMonitor,
        SocketOption, SocketOptions, SocketType, SpineError,
    };

    #[cfg(feature = "sp")]
    pub use crate::{Context, Direction, EndpointId, Flags, Socket, SocketHandle};
}
