//! Handle-based socket registry.
//!
//! A [`Context`] owns a set of sockets addressed by small integer handles,
//! plus the inproc rendezvous table they share. It is an ordinary value:
//! create as many as needed; sockets in different contexts cannot reach each
//! other over `inproc://`.
//!
//! Handles increase monotonically and are never reused, so a stale handle
//! can always be told apart from a live one:
//!
//! | Handle state    | `close`          | any other operation |
//! |-----------------|------------------|---------------------|
//! | open            | closes it        | runs                |
//! | closed          | `AlreadyClosed`  | `SocketClosed`      |
//! | never issued    | `InvalidArgument`| `InvalidArgument`   |
//!
//! ```rust
//! use spine::prelude::*;
//!
//! # fn main() -> spine::Result<()> {
//! let ctx = Context::new();
//! let pull = ctx.create(SocketType::Pull, Domain::Sp)?;
//! let push = ctx.create(SocketType::Push, Domain::Sp)?;
//! ctx.bind(pull, "inproc://work")?;
//! ctx.connect(push, "inproc://work")?;
//!
//! ctx.send(push, "job", Flags::NONE)?;
//! assert_eq!(ctx.recv(pull, Flags::NONE)?, "job");
//!
//! ctx.close(push)?;
//! assert_eq!(ctx.close(push).unwrap_err().kind(), ErrorKind::AlreadyClosed);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use spine_core::error::{Result, SpineError};
use spine_core::inproc::InprocRegistry;
use spine_core::monitor::SocketMonitor;
use spine_core::options::{SocketOption, SocketOptions};
use spine_core::socket_type::{Domain, SocketType};
use spine_sp::{EndpointId, Flags, Socket};
use tracing::debug;

/// Integer name of a socket within its [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(u32);

impl SocketHandle {
    /// The raw handle number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

enum Slot {
    Open(Socket),
    Closed,
}

/// Owner of a set of sockets and their shared inproc namespace.
pub struct Context {
    inproc: InprocRegistry,
    sockets: DashMap<SocketHandle, Slot>,
    next_handle: AtomicU32,
    terminated: AtomicBool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("open_sockets", &self.open_sockets())
            .field("terminated", &self.terminated.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inproc: InprocRegistry::new(),
            sockets: DashMap::new(),
            next_handle: AtomicU32::new(0),
            terminated: AtomicBool::new(false),
        }
    }

    /// Create a socket with default options.
    pub fn create(&self, socket_type: SocketType, domain: Domain) -> Result<SocketHandle> {
        self.create_with_options(socket_type, domain, SocketOptions::default())
    }

    /// Create a socket with explicit options.
    ///
    /// # Errors
    ///
    /// `SocketClosed` once the context has been terminated.
    pub fn create_with_options(
        &self,
        socket_type: SocketType,
        domain: Domain,
        options: SocketOptions,
    ) -> Result<SocketHandle> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(SpineError::SocketClosed);
        }
        let socket = Socket::with_options(socket_type, domain, options, self.inproc.clone())?;
        let handle = SocketHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.sockets.insert(handle, Slot::Open(socket));

        // A terminate that swept the table before the insert missed this one.
        if self.terminated.load(Ordering::Acquire) {
            if let Some(mut slot) = self.sockets.get_mut(&handle) {
                if let Slot::Open(socket) = std::mem::replace(slot.value_mut(), Slot::Closed) {
                    drop(slot);
                    let _ = socket.close();
                }
            }
            return Err(SpineError::SocketClosed);
        }
        debug!("[CONTEXT] Created {} {} socket as {}", domain, socket_type, handle);
        Ok(handle)
    }

    /// A clone of the socket behind `handle`.
    ///
    /// The clone keeps working after the handle is closed only to report
    /// `SocketClosed`.
    pub fn socket(&self, handle: SocketHandle) -> Result<Socket> {
        match self.sockets.get(&handle).as_deref() {
            Some(Slot::Open(socket)) => Ok(socket.clone()),
            Some(Slot::Closed) => Err(SpineError::SocketClosed),
            None => Err(SpineError::invalid(format!("unknown socket handle {}", handle.0))),
        }
    }

    /// Number of sockets not yet closed.
    #[must_use]
    pub fn open_sockets(&self) -> usize {
        self.sockets
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Open(_)))
            .count()
    }

    /// Listen on `addr`.
    pub fn bind(&self, handle: SocketHandle, addr: &str) -> Result<EndpointId> {
        self.socket(handle)?.bind(addr)
    }

    /// Dial `addr` in the background.
    pub fn connect(&self, handle: SocketHandle, addr: &str) -> Result<EndpointId> {
        self.socket(handle)?.connect(addr)
    }

    /// Remove a bind endpoint.
    pub fn unbind(&self, handle: SocketHandle, endpoint: EndpointId) -> Result<()> {
        self.socket(handle)?.unbind(endpoint)
    }

    /// Remove a connect endpoint.
    pub fn disconnect(&self, handle: SocketHandle, endpoint: EndpointId) -> Result<()> {
        self.socket(handle)?.disconnect(endpoint)
    }

    /// Send one message; returns the payload length.
    pub fn send(&self, handle: SocketHandle, msg: impl Into<Bytes>, flags: Flags) -> Result<usize> {
        // The map guard is released before blocking so `close` can proceed.
        self.socket(handle)?.send(msg, flags)
    }

    /// Receive one message.
    pub fn recv(&self, handle: SocketHandle, flags: Flags) -> Result<Bytes> {
        self.socket(handle)?.recv(flags)
    }

    /// Send UTF-8 text.
    pub fn send_str(&self, handle: SocketHandle, msg: &str, flags: Flags) -> Result<usize> {
        self.socket(handle)?.send_str(msg, flags)
    }

    /// Receive a message as UTF-8 text.
    pub fn recv_string(&self, handle: SocketHandle, flags: Flags) -> Result<String> {
        self.socket(handle)?.recv_string(flags)
    }

    /// Add a SUB topic prefix.
    pub fn subscribe(&self, handle: SocketHandle, topic: impl Into<Bytes>) -> Result<()> {
        self.socket(handle)?.subscribe(topic)
    }

    /// Remove a SUB topic prefix.
    pub fn unsubscribe(&self, handle: SocketHandle, topic: impl Into<Bytes>) -> Result<()> {
        self.socket(handle)?.unsubscribe(topic)
    }

    /// Apply a runtime option.
    pub fn set_option(&self, handle: SocketHandle, option: SocketOption) -> Result<()> {
        self.socket(handle)?.set_option(option)
    }

    /// Snapshot of a socket's options.
    pub fn options(&self, handle: SocketHandle) -> Result<SocketOptions> {
        Ok(self.socket(handle)?.options())
    }

    /// Descriptor readable while `recv` would not block.
    #[cfg(unix)]
    pub fn recv_fd(&self, handle: SocketHandle) -> Result<std::os::unix::io::RawFd> {
        self.socket(handle)?.recv_fd()
    }

    /// Descriptor readable while `send` would not block.
    #[cfg(unix)]
    pub fn send_fd(&self, handle: SocketHandle) -> Result<std::os::unix::io::RawFd> {
        self.socket(handle)?.send_fd()
    }

    /// Lifecycle events of a socket.
    pub fn monitor(&self, handle: SocketHandle) -> Result<SocketMonitor> {
        Ok(self.socket(handle)?.monitor())
    }

    /// The handle's number, for callers that track sockets as integers.
    pub fn handle_fd(&self, handle: SocketHandle) -> Result<u32> {
        self.socket(handle).map(|_| handle.get())
    }

    /// Close a socket. Callers blocked on it return `SocketClosed`.
    ///
    /// # Errors
    ///
    /// - `AlreadyClosed` if the handle was closed before
    /// - `InvalidArgument` if the handle was never issued
    pub fn close(&self, handle: SocketHandle) -> Result<()> {
        let socket = {
            let mut slot = self
                .sockets
                .get_mut(&handle)
                .ok_or_else(|| SpineError::invalid(format!("unknown socket handle {}", handle.0)))?;
            match std::mem::replace(slot.value_mut(), Slot::Closed) {
                Slot::Open(socket) => socket,
                Slot::Closed => return Err(SpineError::AlreadyClosed),
            }
        };
        debug!("[CONTEXT] Closing {}", handle);
        socket.close()
    }

    /// Close every open socket. Later `create` calls fail.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut open = Vec::new();
        for mut slot in self.sockets.iter_mut() {
            if let Slot::Open(socket) = std::mem::replace(slot.value_mut(), Slot::Closed) {
                open.push(socket);
            }
        }
        debug!("[CONTEXT] Terminating, closing {} socket(s)", open.len());
        for socket in open {
            // A clone held elsewhere may have closed it already.
            let _ = socket.close();
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.terminate();
    }
}
