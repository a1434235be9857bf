//! In-process transport rendezvous.
//!
//! Sockets that live in the same context reach each other through an
//! [`InprocRegistry`]. A bind registers a name and receives a stream of
//! [`InprocConnect`] requests; a connect looks the name up, builds a pair of
//! bounded message channels and hands one half to the binder. Messages move
//! between the two sockets as `Bytes` without framing or copying.
//!
//! The registry is a value owned by whoever creates sockets (the context),
//! so independent contexts have independent inproc namespaces.
//!
//! # Usage
//!
//! ```rust
//! use spine_core::inproc::InprocRegistry;
//! use spine_core::socket_type::SocketType;
//! use bytes::Bytes;
//!
//! let registry = InprocRegistry::new();
//! let incoming = registry.bind("jobs", SocketType::Pull).unwrap();
//!
//! let client = registry.connect("jobs", SocketType::Push).unwrap();
//! let request = incoming.recv().unwrap();
//! assert_eq!(request.socket_type, SocketType::Push);
//!
//! client.tx.send(Bytes::from_static(b"work")).unwrap();
//! assert_eq!(request.half.rx.recv().unwrap(), Bytes::from_static(b"work"));
//! ```

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{Receiver, Sender};

use crate::config::INPROC_LINK_CAPACITY;
use crate::socket_type::SocketType;

/// One direction-pair of an inproc link, as seen from one socket.
#[derive(Debug)]
pub struct InprocHalf {
    /// Messages to the peer
    pub tx: Sender<Bytes>,
    /// Messages from the peer
    pub rx: Receiver<Bytes>,
}

/// Create both halves of an inproc link.
#[must_use]
pub fn link_pair() -> (InprocHalf, InprocHalf) {
    let (a_tx, b_rx) = flume::bounded(INPROC_LINK_CAPACITY);
    let (b_tx, a_rx) = flume::bounded(INPROC_LINK_CAPACITY);
    (
        InprocHalf { tx: a_tx, rx: a_rx },
        InprocHalf { tx: b_tx, rx: b_rx },
    )
}

/// A connect request delivered to the binding socket.
#[derive(Debug)]
pub struct InprocConnect {
    /// Pattern of the connecting socket
    pub socket_type: SocketType,
    /// The binder's half of the new link
    pub half: InprocHalf,
}

#[derive(Debug)]
struct Binding {
    socket_type: SocketType,
    tx: Sender<InprocConnect>,
}

/// Name table for `inproc://` endpoints.
#[derive(Debug, Clone, Default)]
pub struct InprocRegistry {
    bindings: Arc<DashMap<String, Binding>>,
}

impl InprocRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for a socket of `socket_type`.
    ///
    /// Fails with `AddrInUse` if the name is taken by a live binding. A name
    /// whose binder has gone away is reclaimed.
    pub fn bind(&self, name: &str, socket_type: SocketType) -> io::Result<Receiver<InprocConnect>> {
        let (tx, rx) = flume::unbounded();
        match self.bindings.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().tx.is_disconnected() {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("inproc://{name} is already bound"),
                    ));
                }
                occupied.insert(Binding { socket_type, tx });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Binding { socket_type, tx });
            }
        }
        tracing::debug!("[INPROC] Bound inproc://{} ({})", name, socket_type);
        Ok(rx)
    }

    /// Remove the binding for `name`.
    ///
    /// Dropping the binding's sender ends the binder's accept loop.
    pub fn unbind(&self, name: &str) -> bool {
        let removed = self.bindings.remove(name).is_some();
        if removed {
            tracing::debug!("[INPROC] Unbound inproc://{}", name);
        }
        removed
    }

    /// Connect to `name` as a socket of `socket_type`.
    ///
    /// Fails with `ConnectionRefused` if nothing is bound (the caller is
    /// expected to retry) and with `InvalidInput` if the bound socket speaks
    /// an incompatible pattern.
    pub fn connect(&self, name: &str, socket_type: SocketType) -> io::Result<InprocHalf> {
        let Some(binding) = self.bindings.get(name) else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("inproc://{name} is not bound"),
            ));
        };
        if !socket_type.is_compatible(binding.socket_type) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} socket cannot connect to {} socket at inproc://{name}",
                    socket_type, binding.socket_type
                ),
            ));
        }

        let (local, remote) = link_pair();
        binding
            .tx
            .send(InprocConnect {
                socket_type,
                half: remote,
            })
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("inproc://{name} is shutting down"),
                )
            })?;
        Ok(local)
    }

    /// Names currently bound.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.bindings.iter().map(|entry| entry.key().clone()).collect()
    }
}
