//! Public socket object.
//!
//! [`Socket`] is a cheap, cloneable handle over a [`SocketCore`]. Dropping
//! the last clone closes the socket.
//!
//! ```rust,no_run
//! use spine_sp::socket::{Flags, Socket};
//! use spine_core::prelude::*;
//!
//! # fn main() -> spine_core::error::Result<()> {
//! let inproc = InprocRegistry::new();
//! let rep = Socket::new(SocketType::Rep, Domain::Sp, inproc.clone())?;
//! rep.bind("inproc://echo")?;
//!
//! let req = Socket::new(SocketType::Req, Domain::Sp, inproc)?;
//! req.connect("inproc://echo")?;
//!
//! req.send("ping", Flags::NONE)?;
//! let request = rep.recv(Flags::NONE)?;
//! rep.send(request, Flags::NONE)?;
//! assert_eq!(req.recv(Flags::NONE)?, "ping");
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::ops::BitOr;
use std::sync::Arc;

use bytes::Bytes;
use spine_core::error::{Result, SpineError};
use spine_core::inproc::InprocRegistry;
use spine_core::monitor::SocketMonitor;
use spine_core::options::{SocketOption, SocketOptions};
use spine_core::socket_type::{Domain, SocketType};
use tracing::debug;

use crate::core::SocketCore;
use crate::endpoint::EndpointId;

/// Per-call flags for `send`/`recv`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Self = Self(0);
    /// Fail with `WouldBlock` instead of waiting (NN_DONTWAIT)
    pub const DONTWAIT: Self = Self(1);

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Closes the core when the last `Socket` clone goes away.
struct SocketOwner {
    core: Arc<SocketCore>,
}

impl Drop for SocketOwner {
    fn drop(&mut self) {
        if self.core.close().is_ok() {
            debug!("[SOCKET] {} closed on drop", self.core.socket_type());
        }
    }
}

/// A scalability-protocol socket.
#[derive(Clone)]
pub struct Socket {
    owner: Arc<SocketOwner>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("type", &self.core().socket_type())
            .field("domain", &self.core().domain())
            .field("closed", &self.core().is_closed())
            .finish()
    }
}

impl Socket {
    /// Create a socket with default options.
    ///
    /// `inproc` is the rendezvous table shared by every socket that should
    /// reach the others over `inproc://`.
    pub fn new(socket_type: SocketType, domain: Domain, inproc: InprocRegistry) -> Result<Self> {
        Self::with_options(socket_type, domain, SocketOptions::default(), inproc)
    }

    /// Create a socket with explicit options.
    pub fn with_options(
        socket_type: SocketType,
        domain: Domain,
        options: SocketOptions,
        inproc: InprocRegistry,
    ) -> Result<Self> {
        let core = SocketCore::new(socket_type, domain, options, inproc);
        Ok(Self {
            owner: Arc::new(SocketOwner { core }),
        })
    }

    fn core(&self) -> &Arc<SocketCore> {
        &self.owner.core
    }

    #[must_use]
    pub fn socket_type(&self) -> SocketType {
        self.core().socket_type()
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.core().domain()
    }

    /// Listen on `addr`, e.g. `tcp://*:5555` or `inproc://jobs`.
    pub fn bind(&self, addr: &str) -> Result<EndpointId> {
        self.core().bind(addr)
    }

    /// Dial `addr`. Returns immediately; the peer need not exist yet.
    pub fn connect(&self, addr: &str) -> Result<EndpointId> {
        self.core().connect(addr)
    }

    pub fn unbind(&self, id: EndpointId) -> Result<()> {
        self.core().unbind(id)
    }

    pub fn disconnect(&self, id: EndpointId) -> Result<()> {
        self.core().disconnect(id)
    }

    /// Address a TCP bind endpoint actually listens on (resolves port 0).
    #[must_use]
    pub fn local_addr(&self, id: EndpointId) -> Option<SocketAddr> {
        self.core().local_addr(id)
    }

    /// Send one message. Returns the number of payload bytes accepted.
    pub fn send(&self, msg: impl Into<Bytes>, flags: Flags) -> Result<usize> {
        self.core().send(msg.into(), flags.contains(Flags::DONTWAIT))
    }

    /// Receive one message.
    pub fn recv(&self, flags: Flags) -> Result<Bytes> {
        self.core().recv(flags.contains(Flags::DONTWAIT))
    }

    pub fn send_str(&self, msg: &str, flags: Flags) -> Result<usize> {
        self.send(Bytes::copy_from_slice(msg.as_bytes()), flags)
    }

    /// Receive a message as UTF-8 text.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the payload is not valid UTF-8; the message is
    /// consumed either way.
    pub fn recv_string(&self, flags: Flags) -> Result<String> {
        let msg = self.recv(flags)?;
        String::from_utf8(msg.to_vec())
            .map_err(|e| SpineError::invalid(format!("message is not UTF-8: {e}")))
    }

    /// Add a SUB topic prefix. The empty topic matches everything.
    pub fn subscribe(&self, topic: impl Into<Bytes>) -> Result<()> {
        self.set_option(SocketOption::Subscribe(topic.into()))
    }

    pub fn unsubscribe(&self, topic: impl Into<Bytes>) -> Result<()> {
        self.set_option(SocketOption::Unsubscribe(topic.into()))
    }

    pub fn set_option(&self, option: SocketOption) -> Result<()> {
        self.core().set_option(option)
    }

    /// Snapshot of the current options.
    #[must_use]
    pub fn options(&self) -> SocketOptions {
        self.core().options()
    }

    /// Descriptor readable while a `recv` would not block.
    #[cfg(unix)]
    pub fn recv_fd(&self) -> Result<std::os::unix::io::RawFd> {
        self.core().recv_fd()
    }

    /// Descriptor readable while a `send` would not block.
    #[cfg(unix)]
    pub fn send_fd(&self) -> Result<std::os::unix::io::RawFd> {
        self.core().send_fd()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn monitor(&self) -> SocketMonitor {
        self.core().monitor()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.core().connection_count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    /// Close the socket for every clone.
    ///
    /// Waits up to the linger period for queued output, then tears down all
    /// endpoints and connections. Blocked callers return `SocketClosed`.
    ///
    /// # Errors
    ///
    /// `AlreadyClosed` on the second call.
    pub fn close(&self) -> Result<()> {
        self.core().close()
    }
}
