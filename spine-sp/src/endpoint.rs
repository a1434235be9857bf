//! Endpoint manager: listeners, acceptors and dialers.
//!
//! Every `bind` and `connect` becomes an [`EndpointEntry`] in the socket's
//! endpoint table plus one background thread:
//!
//! - **bind**: the listener is created synchronously (so address-in-use is
//!   reported to the caller), then an acceptor thread hands every accepted
//!   peer to a short-lived handshake thread, which attaches it as a pipe.
//! - **connect**: returns immediately. A dialer thread dials, performs the
//!   handshake, attaches the pipe, then parks until that pipe closes and
//!   dials again. Failed attempts are retried with the socket's reconnect
//!   backoff until the endpoint is removed; they are never reported to the
//!   caller, only to monitors and logs.
//!
//! Removing an endpoint flags its thread to stop and wakes it: dialers
//! through their control channel, TCP and IPC acceptors by shutting their
//! listening socket down, inproc acceptors by dropping the registry binding.
//! Acceptors are joined before removal returns, so the address is free again
//! by then.

use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use spine_core::endpoint::Endpoint;
use spine_core::error::{Result, SpineError};
use spine_core::inproc::{InprocConnect, InprocRegistry};
use spine_core::monitor::SocketEvent;
use spine_core::options::SocketOptions;
use spine_core::reconnect::Backoff;
use spine_core::tcp;
use tracing::{debug, trace, warn};

#[cfg(unix)]
use spine_core::ipc;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::PathBuf;

use crate::core::SocketCore;
use crate::handshake::perform_handshake;
use crate::transport::{ByteStream, Link};

/// Pause after a failed `accept` (e.g. descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound on the fallback self-connection used to wake an acceptor.
const WAKE_TIMEOUT: Duration = Duration::from_millis(500);

/// Identifier returned by `bind`/`connect`, used to remove the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) u32);

impl EndpointId {
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint#{}", self.0)
    }
}

/// Whether an endpoint listens or dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Bind,
    Connect,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bind => "bind",
            Self::Connect => "connect",
        })
    }
}

/// Messages to a dialer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndpointCtl {
    /// The established connection went away; redial
    PipeClosed,
    /// The endpoint was removed
    Stop,
}

/// How to knock a blocked acceptor out of `accept`.
#[derive(Debug)]
enum Waker {
    /// Stream listener: `control` is a second handle to the listening socket
    Listener {
        control: socket2::Socket,
        fallback: WakeTarget,
        acceptor: JoinHandle<()>,
    },
    Inproc {
        name: String,
        acceptor: JoinHandle<()>,
    },
    Dialer,
}

/// Where to dial when shutting a listener down did not wake its acceptor.
#[derive(Debug)]
enum WakeTarget {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Ipc(PathBuf),
}

impl WakeTarget {
    fn dial(&self) -> io::Result<()> {
        match self {
            Self::Tcp(addr) => TcpStream::connect_timeout(addr, WAKE_TIMEOUT).map(drop),
            #[cfg(unix)]
            Self::Ipc(path) => UnixStream::connect(path).map(drop),
        }
    }
}

/// Wait for an acceptor to exit, unless that would mean waiting on ourselves.
fn join_acceptor(acceptor: JoinHandle<()>, endpoint: &Endpoint) {
    if acceptor.thread().id() == thread::current().id() {
        return;
    }
    if acceptor.join().is_err() {
        warn!("[ENDPOINT] Acceptor for {} panicked", endpoint);
    }
}

/// One bound or connected endpoint of a socket.
#[derive(Debug)]
pub struct EndpointEntry {
    endpoint: Endpoint,
    direction: Direction,
    stop: Arc<AtomicBool>,
    control: Option<Sender<EndpointCtl>>,
    waker: Waker,
    local_addr: Option<SocketAddr>,
}

impl EndpointEntry {
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Address a TCP listener actually bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Tell the dialer its connection dropped.
    pub(crate) fn pipe_closed(&self) {
        if let Some(control) = &self.control {
            // A dialer that already exited has nothing to redial.
            let _ = control.send(EndpointCtl::PipeClosed);
        }
    }

    /// Stop the endpoint's thread and release its address.
    ///
    /// Returns once a bound address can be bound again.
    pub(crate) fn stop(self, registry: &InprocRegistry) {
        self.stop.store(true, Ordering::Release);
        if let Some(control) = &self.control {
            let _ = control.send(EndpointCtl::Stop);
        }

        match self.waker {
            Waker::Listener {
                control,
                fallback,
                acceptor,
            } => {
                // Fails the blocked accept and stops the port listening. Some
                // platforms refuse to shut a listener down; dial it instead.
                let woken = match control.shutdown(Shutdown::Both) {
                    Ok(()) => true,
                    Err(e) => {
                        trace!("[ENDPOINT] Listener shutdown on {}: {}", self.endpoint, e);
                        match fallback.dial() {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(
                                    "[ENDPOINT] Could not wake acceptor on {}: {}",
                                    self.endpoint, e
                                );
                                false
                            }
                        }
                    }
                };
                drop(control);
                if woken {
                    join_acceptor(acceptor, &self.endpoint);
                }
                #[cfg(unix)]
                if let WakeTarget::Ipc(path) = &fallback {
                    ipc::unlink(path);
                }
            }
            Waker::Inproc { name, acceptor } => {
                registry.unbind(&name);
                join_acceptor(acceptor, &self.endpoint);
            }
            Waker::Dialer => {}
        }
        trace!("[ENDPOINT] Stopped {}", self.endpoint);
    }
}

fn thread_name(core: &SocketCore, role: &str, id: EndpointId) -> String {
    format!(
        "spine-{}-{role}-{}",
        core.socket_type().as_str().to_ascii_lowercase(),
        id.0
    )
}

/// Start listening on `endpoint`.
pub(crate) fn start_bind(
    core: &Arc<SocketCore>,
    id: EndpointId,
    endpoint: &Endpoint,
    _options: &SocketOptions,
) -> Result<EndpointEntry> {
    let stop = Arc::new(AtomicBool::new(false));
    let name = thread_name(core, "accept", id);

    let (waker, local_addr) = match endpoint {
        Endpoint::Tcp(addr) => {
            let listener = tcp::bind(addr)?;
            let local = listener.local_addr()?;
            let control = socket2::Socket::from(listener.try_clone()?);
            let (core, endpoint, stop) = (core.clone(), endpoint.clone(), stop.clone());
            let acceptor = thread::Builder::new()
                .name(name)
                .spawn(move || tcp_accept_loop(&core, id, &endpoint, &listener, &stop))?;
            let waker = Waker::Listener {
                control,
                fallback: WakeTarget::Tcp(tcp::loopback_addr(local)),
                acceptor,
            };
            (waker, Some(local))
        }
        #[cfg(unix)]
        Endpoint::Ipc(path) => {
            let listener = ipc::bind(path)?;
            let control = socket2::Socket::from(std::os::fd::OwnedFd::from(listener.try_clone()?));
            let (core, endpoint, stop) = (core.clone(), endpoint.clone(), stop.clone());
            let acceptor = thread::Builder::new()
                .name(name)
                .spawn(move || ipc_accept_loop(&core, id, &endpoint, &listener, &stop))?;
            let waker = Waker::Listener {
                control,
                fallback: WakeTarget::Ipc(path.clone()),
                acceptor,
            };
            (waker, None)
        }
        Endpoint::Inproc(bound) => {
            let incoming = core.inproc().bind(bound, core.socket_type())?;
            let (core, endpoint, stop) = (core.clone(), endpoint.clone(), stop.clone());
            let acceptor = thread::Builder::new()
                .name(name)
                .spawn(move || inproc_accept_loop(&core, id, &endpoint, &incoming, &stop))?;
            let waker = Waker::Inproc {
                name: bound.clone(),
                acceptor,
            };
            (waker, None)
        }
    };

    Ok(EndpointEntry {
        endpoint: endpoint.clone(),
        direction: Direction::Bind,
        stop,
        control: None,
        waker,
        local_addr,
    })
}

/// Start the dialer for `endpoint`.
pub(crate) fn start_connect(
    core: &Arc<SocketCore>,
    id: EndpointId,
    endpoint: &Endpoint,
) -> Result<EndpointEntry> {
    let stop = Arc::new(AtomicBool::new(false));
    let (control_tx, control_rx) = flume::unbounded();

    {
        let (core, endpoint, stop) = (core.clone(), endpoint.clone(), stop.clone());
        thread::Builder::new()
            .name(thread_name(&core, "dial", id))
            .spawn(move || dial_loop(&core, id, &endpoint, &control_rx, &stop))?;
    }

    Ok(EndpointEntry {
        endpoint: endpoint.clone(),
        direction: Direction::Connect,
        stop,
        control: Some(control_tx),
        waker: Waker::Dialer,
        local_addr: None,
    })
}

fn tcp_accept_loop(
    core: &Arc<SocketCore>,
    id: EndpointId,
    endpoint: &Endpoint,
    listener: &TcpListener,
    stop: &AtomicBool,
) {
    for incoming in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match incoming {
            Ok(stream) => spawn_handshake(core, id, endpoint, stream),
            Err(e) => {
                warn!("[ENDPOINT] Accept on {} failed: {}", endpoint, e);
                thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }
    trace!("[ENDPOINT] Acceptor for {} exiting", endpoint);
}

#[cfg(unix)]
fn ipc_accept_loop(
    core: &Arc<SocketCore>,
    id: EndpointId,
    endpoint: &Endpoint,
    listener: &UnixListener,
    stop: &AtomicBool,
) {
    for incoming in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match incoming {
            Ok(stream) => spawn_handshake(core, id, endpoint, stream),
            Err(e) => {
                warn!("[ENDPOINT] Accept on {} failed: {}", endpoint, e);
                thread::sleep(ACCEPT_BACKOFF);
            }
        }
    }
    trace!("[ENDPOINT] Acceptor for {} exiting", endpoint);
}

fn inproc_accept_loop(
    core: &Arc<SocketCore>,
    id: EndpointId,
    endpoint: &Endpoint,
    incoming: &Receiver<InprocConnect>,
    stop: &AtomicBool,
) {
    // Ends when the registry binding is dropped.
    while let Ok(request) = incoming.recv() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let peer = format!("{} peer on {}", request.socket_type, endpoint);
        if let Err(e) = core.attach_pipe(id, Link::inproc(request.half, peer)) {
            debug!("[ENDPOINT] Dropped inproc peer on {}: {}", endpoint, e);
        }
    }
    trace!("[ENDPOINT] Acceptor for {} exiting", endpoint);
}

/// Handshake an accepted stream off the acceptor thread, then attach it.
fn spawn_handshake<S: ByteStream>(
    core: &Arc<SocketCore>,
    id: EndpointId,
    endpoint: &Endpoint,
    stream: S,
) {
    let (core, endpoint) = (core.clone(), endpoint.clone());
    let name = thread_name(&core, "hs", id);
    let spawned = thread::Builder::new().name(name).spawn(move || {
        let options = core.options();
        match establish(&core, stream, &options) {
            Ok(link) => {
                let peer = link.peer.clone();
                if core.attach_pipe(id, link).is_ok() {
                    debug!("[ENDPOINT] Accepted {} on {}", peer, endpoint);
                }
            }
            Err(e) => {
                debug!("[ENDPOINT] Rejected peer on {}: {}", endpoint, e);
                core.emit(SocketEvent::HandshakeFailed {
                    endpoint,
                    reason: e.to_string(),
                });
            }
        }
    });
    if let Err(e) = spawned {
        warn!("[ENDPOINT] Could not start handshake thread: {}", e);
    }
}

/// Configure, handshake and wrap a fresh stream.
fn establish<S: ByteStream>(
    core: &SocketCore,
    mut stream: S,
    options: &SocketOptions,
) -> Result<Link> {
    stream.configure(options)?;
    perform_handshake(&mut stream, core.socket_type(), options.handshake_timeout)?;
    Ok(Link::stream(stream, options)?)
}

/// One connection attempt.
fn dial(core: &SocketCore, endpoint: &Endpoint, options: &SocketOptions) -> Result<Link> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = tcp::connect(addr, options.connect_timeout)?;
            establish(core, stream, options)
        }
        #[cfg(unix)]
        Endpoint::Ipc(path) => {
            let stream = ipc::connect(path)?;
            establish(core, stream, options)
        }
        Endpoint::Inproc(name) => {
            let half = core
                .inproc()
                .connect(name, core.socket_type())
                .map_err(|e| match e.kind() {
                    io::ErrorKind::InvalidInput => SpineError::handshake(e.to_string()),
                    _ => SpineError::Io(e),
                })?;
            Ok(Link::inproc(half, endpoint.to_string()))
        }
    }
}

fn dial_loop(
    core: &Arc<SocketCore>,
    id: EndpointId,
    endpoint: &Endpoint,
    control: &Receiver<EndpointCtl>,
    stop: &AtomicBool,
) {
    let mut backoff = Backoff::new(&core.options());

    loop {
        if stop.load(Ordering::Acquire) || core.is_closed() {
            break;
        }

        let options = core.options();
        let delay = match dial(core, endpoint, &options) {
            Ok(link) => match core.attach_pipe(id, link) {
                Ok(pipe) => {
                    debug!("[ENDPOINT] Connected to {} as {}", endpoint, pipe);
                    backoff.reset();
                    match control.recv() {
                        Ok(EndpointCtl::PipeClosed) => backoff.next_delay(),
                        Ok(EndpointCtl::Stop) | Err(_) => break,
                    }
                }
                Err(SpineError::SocketClosed | SpineError::ConnectionClosed) => break,
                Err(e) => {
                    warn!("[ENDPOINT] Could not attach connection to {}: {}", endpoint, e);
                    backoff.next_delay()
                }
            },
            Err(e) => {
                let delay = backoff.next_delay();
                debug!(
                    "[ENDPOINT] Dial {} failed (attempt {}): {}; retrying in {:?}",
                    endpoint,
                    backoff.failures(),
                    e,
                    delay
                );
                if matches!(e, SpineError::Handshake(_)) {
                    core.emit(SocketEvent::HandshakeFailed {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    });
                }
                core.emit(SocketEvent::ConnectRetried {
                    endpoint: endpoint.clone(),
                    delay,
                    reason: e.to_string(),
                });
                delay
            }
        };

        match control.recv_timeout(delay) {
            Ok(EndpointCtl::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(EndpointCtl::PipeClosed) | Err(RecvTimeoutError::Timeout) => {}
        }
    }
    trace!("[ENDPOINT] Dialer for {} exiting", endpoint);
}
