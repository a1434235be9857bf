//! Socket core: shared state, worker threads and the blocking adapter.
//!
//! Everything mutable about a socket lives in one [`CoreState`] behind one
//! `parking_lot::Mutex`: options, the live pipe set with its queues, the
//! pattern state, the endpoint table, and the two readiness signals. Caller
//! threads, connection workers, acceptors and dialers all take the same lock,
//! so routing never observes a half-added or half-removed connection.
//!
//! ## Threads
//!
//! ```text
//! caller ──send──▶ Pattern::try_send ──▶ pipe.outbound ──▶ writer thread ──▶ link
//! caller ◀─recv─── Pattern::try_recv ◀── pipe.inbound  ◀── reader thread ◀── link
//! ```
//!
//! Callers block on the socket condition variable `changed`, which is
//! notified whenever a readiness level changes. Worker threads block on their
//! pipe's own condition variables.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use spine_core::endpoint::Endpoint;
use spine_core::error::{Result, SpineError};
use spine_core::inproc::InprocRegistry;
use spine_core::monitor::{MonitorHub, SocketEvent, SocketMonitor};
use spine_core::options::{SocketOption, SocketOptions};
use spine_core::signal::Signal;
use spine_core::socket_type::{Domain, SocketType};
use tracing::{debug, trace, warn};

use crate::endpoint::{self, Direction, EndpointEntry, EndpointId};
use crate::pattern::Pattern;
use crate::pipe::{Pipe, PipeId, PipeSet, PipeWake};
use crate::transport::{FrameRead, FrameWrite, Link};

/// Everything guarded by the socket lock.
#[derive(Debug)]
pub struct CoreState {
    pub options: SocketOptions,
    pub pipes: PipeSet,
    pub pattern: Pattern,
    pub endpoints: HashMap<EndpointId, EndpointEntry>,
    pub closed: bool,
    /// Protocol error from a dropped connection, reported by the next `recv`
    pub pending_error: Option<SpineError>,
    pub recv_signal: Signal,
    pub send_signal: Signal,
    pub monitors: MonitorHub,
}

impl CoreState {
    /// Recompute both readiness levels. Returns `true` if either changed.
    fn refresh(&mut self) -> bool {
        let recv_ready =
            self.closed || self.pending_error.is_some() || self.pattern.can_recv(&self.pipes);
        let send_ready = self.closed || self.pattern.can_send(&self.pipes);
        let recv_changed = self.recv_signal.set(recv_ready);
        let send_changed = self.send_signal.set(send_ready);
        recv_changed || send_changed
    }
}

/// Shared socket internals. Held by the public socket handle and by every
/// worker thread.
#[derive(Debug)]
pub struct SocketCore {
    socket_type: SocketType,
    domain: Domain,
    inproc: InprocRegistry,
    state: Mutex<CoreState>,
    changed: Condvar,
    next_pipe: AtomicU64,
    next_endpoint: AtomicU32,
}

/// Which operation a blocking wait is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitFor {
    Send,
    Recv,
}

impl SocketCore {
    #[must_use]
    pub fn new(
        socket_type: SocketType,
        domain: Domain,
        options: SocketOptions,
        inproc: InprocRegistry,
    ) -> Arc<Self> {
        let pattern = Pattern::new(socket_type, &options);
        let mut state = CoreState {
            options,
            pipes: PipeSet::new(),
            pattern,
            endpoints: HashMap::new(),
            closed: false,
            pending_error: None,
            recv_signal: Signal::new(),
            send_signal: Signal::new(),
            monitors: MonitorHub::new(),
        };
        state.refresh();

        Arc::new(Self {
            socket_type,
            domain,
            inproc,
            state: Mutex::new(state),
            changed: Condvar::new(),
            next_pipe: AtomicU64::new(1),
            next_endpoint: AtomicU32::new(1),
        })
    }

    #[inline]
    #[must_use]
    pub const fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    #[inline]
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    #[must_use]
    pub fn inproc(&self) -> &InprocRegistry {
        &self.inproc
    }

    /// Refresh readiness and wake waiters if anything changed.
    pub(crate) fn settle(&self, state: &mut CoreState) {
        if state.refresh() {
            self.changed.notify_all();
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[must_use]
    pub fn options(&self) -> SocketOptions {
        self.state.lock().options.clone()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().pipes.len()
    }

    pub fn monitor(&self) -> SocketMonitor {
        self.state.lock().monitors.subscribe()
    }

    pub(crate) fn emit(&self, event: SocketEvent) {
        let mut state = self.state.lock();
        if !state.closed {
            state.monitors.emit(event);
        }
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    /// Listen on `addr`. Bind failures are reported here, synchronously.
    pub fn bind(self: &Arc<Self>, addr: &str) -> Result<EndpointId> {
        self.add_endpoint(addr, Direction::Bind)
    }

    /// Start dialing `addr` in the background.
    pub fn connect(self: &Arc<Self>, addr: &str) -> Result<EndpointId> {
        self.add_endpoint(addr, Direction::Connect)
    }

    fn add_endpoint(self: &Arc<Self>, addr: &str, direction: Direction) -> Result<EndpointId> {
        let endpoint = Endpoint::parse(addr)?;
        if self.domain == Domain::Local && !endpoint.is_inproc() {
            return Err(SpineError::invalid(format!(
                "{} sockets only support inproc endpoints, got {}",
                self.domain, endpoint
            )));
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(SpineError::SocketClosed);
        }

        let id = EndpointId(self.next_endpoint.fetch_add(1, Ordering::Relaxed));
        // Started under the lock: new threads block on it until the entry
        // is in the table.
        let entry = match direction {
            Direction::Bind => endpoint::start_bind(self, id, &endpoint, &state.options)?,
            Direction::Connect => endpoint::start_connect(self, id, &endpoint)?,
        };
        debug!("[ENDPOINT] {} {} {} as {}", self.socket_type, direction, endpoint, id);
        state.endpoints.insert(id, entry);
        if direction == Direction::Bind {
            state.monitors.emit(SocketEvent::Bound(endpoint));
        }
        Ok(id)
    }

    /// Remove a bind endpoint and all of its connections.
    pub fn unbind(&self, id: EndpointId) -> Result<()> {
        self.remove_endpoint(id, Direction::Bind)
    }

    /// Remove a connect endpoint and its connection.
    pub fn disconnect(&self, id: EndpointId) -> Result<()> {
        self.remove_endpoint(id, Direction::Connect)
    }

    fn remove_endpoint(&self, id: EndpointId, direction: Direction) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SpineError::SocketClosed);
        }
        match state.endpoints.get(&id) {
            None => return Err(SpineError::invalid(format!("unknown endpoint {id}"))),
            Some(entry) if entry.direction() != direction => {
                return Err(SpineError::invalid(format!(
                    "{id} is a {} endpoint",
                    entry.direction()
                )));
            }
            Some(_) => {}
        }
        let Some(entry) = state.endpoints.remove(&id) else {
            return Err(SpineError::invalid(format!("unknown endpoint {id}")));
        };

        let doomed = state.pipes.ids_for(id);
        let now = Instant::now();
        for pipe_id in doomed {
            if let Some(pipe) = state.pipes.remove(pipe_id) {
                pipe.shutdown();
                let CoreState { pattern, pipes, .. } = &mut *state;
                pattern.pipe_removed(pipe_id, pipes, now);
            }
        }

        debug!("[ENDPOINT] Removed {} ({})", id, entry.endpoint());
        state
            .monitors
            .emit(SocketEvent::EndpointRemoved(entry.endpoint().clone()));
        self.settle(&mut state);
        drop(state);

        entry.stop(&self.inproc);
        Ok(())
    }

    /// Actual address of a bind endpoint (resolves TCP port 0).
    #[must_use]
    pub fn local_addr(&self, id: EndpointId) -> Option<SocketAddr> {
        self.state.lock().endpoints.get(&id).and_then(EndpointEntry::local_addr)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Turn an established link into a live pipe and start its workers.
    pub(crate) fn attach_pipe(
        self: &Arc<Self>,
        endpoint: EndpointId,
        link: Link,
    ) -> Result<PipeId> {
        let Link {
            reader,
            writer,
            closer,
            peer,
        } = link;

        let mut state = self.state.lock();
        if state.closed {
            closer.close();
            return Err(SpineError::SocketClosed);
        }
        if !state.endpoints.contains_key(&endpoint) {
            closer.close();
            return Err(SpineError::ConnectionClosed);
        }

        let id = PipeId(self.next_pipe.fetch_add(1, Ordering::Relaxed));
        let pipe = Pipe::new(
            id,
            endpoint,
            peer.clone(),
            state.options.recv_hwm,
            state.options.send_hwm,
            closer,
        );
        let wake = pipe.wake();
        state.pipes.insert(pipe);
        let CoreState { pattern, pipes, .. } = &mut *state;
        pattern.pipe_added(id, pipes, Instant::now());

        let event = state.endpoints.get(&endpoint).map(|entry| {
            let (endpoint, peer) = (entry.endpoint().clone(), peer.clone());
            match entry.direction() {
                Direction::Bind => SocketEvent::Accepted { endpoint, peer },
                Direction::Connect => SocketEvent::Connected { endpoint, peer },
            }
        });
        if let Some(event) = event {
            state.monitors.emit(event);
        }
        self.settle(&mut state);
        drop(state);

        debug!("[PIPE] {} attached to {} ({})", id, endpoint, peer);
        if let Err(e) = self.spawn_workers(id, reader, writer, wake) {
            warn!("[PIPE] Could not start workers for {}: {}", id, e);
            self.detach_pipe(id, None);
            return Err(SpineError::Io(e));
        }
        Ok(id)
    }

    fn spawn_workers(
        self: &Arc<Self>,
        id: PipeId,
        reader: Box<dyn FrameRead>,
        writer: Box<dyn FrameWrite>,
        wake: Arc<PipeWake>,
    ) -> std::io::Result<()> {
        let tag = self.socket_type.as_str().to_ascii_lowercase();

        let core = self.clone();
        let reader_wake = wake.clone();
        thread::Builder::new()
            .name(format!("spine-{tag}-rd-{}", id.0))
            .spawn(move || core.reader_loop(id, reader, &reader_wake))?;

        let core = self.clone();
        thread::Builder::new()
            .name(format!("spine-{tag}-wr-{}", id.0))
            .spawn(move || core.writer_loop(id, writer, &wake))?;
        Ok(())
    }

    /// Remove a pipe after its link failed or was closed.
    pub(crate) fn detach_pipe(&self, id: PipeId, cause: Option<SpineError>) {
        let mut state = self.state.lock();
        let Some(mut pipe) = state.pipes.remove(id) else {
            return;
        };
        pipe.shutdown();
        if state.pattern.salvages_inbound() && !state.closed {
            let limit = state.options.recv_hwm;
            state.pipes.salvage(&mut pipe, limit);
        }

        let CoreState { pattern, pipes, .. } = &mut *state;
        pattern.pipe_removed(id, pipes, Instant::now());

        match cause {
            Some(err) if err.is_protocol_error() => {
                warn!("[PIPE] {} dropped: {}", id, err);
                if self.socket_type.can_recv() && !state.closed {
                    state.pending_error = Some(err);
                }
            }
            Some(err) => debug!("[PIPE] {} closed: {}", id, err),
            None => debug!("[PIPE] {} closed", id),
        }

        let endpoint = state.endpoints.get(&pipe.endpoint()).map(|entry| {
            entry.pipe_closed();
            entry.endpoint().clone()
        });
        if let Some(endpoint) = endpoint {
            state.monitors.emit(SocketEvent::Disconnected {
                endpoint,
                peer: pipe.peer().to_string(),
            });
        }
        self.settle(&mut state);
        if state.closed {
            // A lingering close may be waiting on this pipe's queue.
            self.changed.notify_all();
        }
    }

    fn reader_loop(&self, id: PipeId, mut reader: Box<dyn FrameRead>, wake: &PipeWake) {
        loop {
            let mut msg = match reader.read_message() {
                Ok(msg) => msg,
                Err(e) => {
                    self.detach_pipe(id, Some(e));
                    return;
                }
            };

            let mut state = self.state.lock();
            // Wait for room; backpressure reaches the peer through the link.
            loop {
                if state.closed {
                    return;
                }
                let full = match state.pipes.get(id) {
                    None => return,
                    Some(pipe) => pipe.inbound_full(),
                };
                if !full {
                    break;
                }
                wake.inbound_space.wait(&mut state);
            }

            if !state.pattern.accept_inbound(id, &mut msg) {
                continue;
            }
            trace!("[PIPE] {} received {} bytes", id, msg.len());
            if let Ok(pipe) = state.pipes.get_mut(id) {
                pipe.push_inbound(msg);
            }
            self.settle(&mut state);
        }
    }

    fn writer_loop(&self, id: PipeId, mut writer: Box<dyn FrameWrite>, wake: &PipeWake) {
        loop {
            let msg = {
                let mut state = self.state.lock();
                let msg = loop {
                    match state.pipes.get_mut(id) {
                        Err(_) => return,
                        Ok(pipe) => {
                            if let Some(msg) = pipe.pop_outbound() {
                                break msg;
                            }
                        }
                    }
                    wake.outbound.wait(&mut state);
                };
                self.settle(&mut state);
                msg
            };

            let result = writer.write_message(&msg);

            let mut state = self.state.lock();
            if let Ok(pipe) = state.pipes.get_mut(id) {
                pipe.finish_write();
            }
            if state.closed {
                // Lingering close is waiting for queues to drain.
                self.changed.notify_all();
            }
            drop(state);

            match result {
                Ok(()) => trace!("[PIPE] {} wrote {} bytes", id, msg.len()),
                Err(e) => {
                    self.detach_pipe(id, Some(e));
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Send one message, waiting per `nonblocking` and the send timeout.
    pub fn send(&self, msg: Bytes, nonblocking: bool) -> Result<usize> {
        if !self.socket_type.can_send() {
            return Err(SpineError::UnsupportedOperation {
                operation: "send",
                socket_type: self.socket_type,
            });
        }

        let mut state = self.state.lock();
        let timeout = if nonblocking {
            Some(Duration::ZERO)
        } else {
            state.options.send_timeout
        };
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if state.closed {
                return Err(SpineError::SocketClosed);
            }
            let now = Instant::now();
            let CoreState { pattern, pipes, .. } = &mut *state;
            let timer = pattern.tick(pipes, now);
            match pattern.try_send(pipes, msg.clone(), now) {
                Err(SpineError::WouldBlock) => {}
                other => {
                    self.settle(&mut state);
                    return other;
                }
            }
            self.settle(&mut state);
            self.wait(&mut state, WaitFor::Send, timeout, deadline, timer)?;
        }
    }

    /// Receive one message, waiting per `nonblocking` and the receive timeout.
    pub fn recv(&self, nonblocking: bool) -> Result<Bytes> {
        if !self.socket_type.can_recv() {
            return Err(SpineError::UnsupportedOperation {
                operation: "recv",
                socket_type: self.socket_type,
            });
        }

        let mut state = self.state.lock();
        let timeout = if nonblocking {
            Some(Duration::ZERO)
        } else {
            state.options.recv_timeout
        };
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if state.closed {
                return Err(SpineError::SocketClosed);
            }
            if let Some(err) = state.pending_error.take() {
                self.settle(&mut state);
                return Err(err);
            }
            let now = Instant::now();
            let CoreState { pattern, pipes, .. } = &mut *state;
            let timer = pattern.tick(pipes, now);
            match pattern.try_recv(pipes) {
                Err(SpineError::WouldBlock) => {}
                other => {
                    self.settle(&mut state);
                    return other;
                }
            }
            self.settle(&mut state);
            self.wait(&mut state, WaitFor::Recv, timeout, deadline, timer)?;
        }
    }

    /// Park the caller until readiness may have changed, a pattern timer is
    /// due, or the deadline passes.
    fn wait(
        &self,
        state: &mut MutexGuard<'_, CoreState>,
        direction: WaitFor,
        timeout: Option<Duration>,
        deadline: Option<Instant>,
        timer: Option<Instant>,
    ) -> Result<()> {
        if let (Some(timeout), Some(deadline)) = (timeout, deadline) {
            if timeout.is_zero() {
                return Err(SpineError::WouldBlock);
            }
            if Instant::now() >= deadline {
                if direction == WaitFor::Recv {
                    let CoreState { pattern, pipes, .. } = &mut **state;
                    pattern.recv_timed_out(pipes);
                    self.settle(state);
                }
                return Err(SpineError::Timeout(timeout));
            }
        }

        let wake_at = match (deadline, timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match wake_at {
            Some(at) => {
                self.changed.wait_until(state, at);
            }
            None => self.changed.wait(state),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Options and readiness
    // ------------------------------------------------------------------

    /// Apply a runtime option.
    pub fn set_option(&self, option: SocketOption) -> Result<()> {
        option.validate_for(self.socket_type)?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(SpineError::SocketClosed);
        }
        state.options.apply(&option)?;

        let CoreState {
            pattern,
            pipes,
            options,
            ..
        } = &mut *state;
        match option {
            SocketOption::Subscribe(topic) => pattern.subscribe(topic)?,
            SocketOption::Unsubscribe(topic) => pattern.unsubscribe(&topic, pipes)?,
            SocketOption::ResendInterval(ivl) => pattern.set_resend_ivl(ivl),
            SocketOption::SendBuffer(_) | SocketOption::ReceiveBuffer(_) => {
                pipes.set_hwm(options.recv_hwm, options.send_hwm);
            }
            _ => {}
        }
        self.settle(&mut state);
        // Timeouts shortened under a waiting caller take effect on its next
        // wake-up; make that now.
        self.changed.notify_all();
        Ok(())
    }

    /// Descriptor readable while a message can be received.
    #[cfg(unix)]
    pub fn recv_fd(&self) -> Result<std::os::unix::io::RawFd> {
        if !self.socket_type.can_recv() {
            return Err(SpineError::UnsupportedOperation {
                operation: "recv_fd",
                socket_type: self.socket_type,
            });
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(SpineError::SocketClosed);
        }
        Ok(state.recv_signal.fd()?)
    }

    /// Descriptor readable while a message can be sent.
    #[cfg(unix)]
    pub fn send_fd(&self) -> Result<std::os::unix::io::RawFd> {
        if !self.socket_type.can_send() {
            return Err(SpineError::UnsupportedOperation {
                operation: "send_fd",
                socket_type: self.socket_type,
            });
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(SpineError::SocketClosed);
        }
        Ok(state.send_signal.fd()?)
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Close the socket.
    ///
    /// Waiters wake immediately with `SocketClosed`. Queued outbound
    /// messages get up to `linger` to be written, then every endpoint and
    /// connection is torn down.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SpineError::AlreadyClosed);
        }
        state.closed = true;
        state.refresh();
        self.changed.notify_all();

        let linger = state.options.linger_duration();
        if !linger.is_zero() && state.pipes.has_pending_output() {
            debug!("[SOCKET] Lingering up to {:?} for queued messages", linger);
            let deadline = Instant::now() + linger;
            while state.pipes.has_pending_output() {
                if self.changed.wait_until(&mut state, deadline).timed_out() {
                    debug!("[SOCKET] Linger expired with messages still queued");
                    break;
                }
            }
        }

        let endpoints: Vec<EndpointEntry> = state.endpoints.drain().map(|(_, e)| e).collect();
        for pipe in state.pipes.drain() {
            pipe.shutdown();
        }
        state.pending_error = None;
        state.refresh();
        state.monitors.finish(SocketEvent::Closed);
        drop(state);

        for entry in endpoints {
            entry.stop(&self.inproc);
        }
        debug!("[SOCKET] {} socket closed", self.socket_type);
        Ok(())
    }
}
