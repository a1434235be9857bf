//! Per-connection message queues.
//!
//! A [`Pipe`] is the socket-side state of one live connection: a bounded
//! inbound queue filled by the connection's reader thread and a bounded
//! outbound queue drained by its writer thread. Pipes live in a [`PipeSet`]
//! guarded by the socket lock, which also keeps the round-robin cursors the
//! patterns use for load balancing and fair queueing.
//!
//! The two worker threads park on the pipe's [`PipeWake`] condition
//! variables (waited with the socket lock), so enqueueing a message or
//! freeing inbound space wakes exactly the thread that cares.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Condvar;
use smallvec::SmallVec;
use spine_core::error::{Result, SpineError};
use tracing::trace;

use crate::endpoint::EndpointId;
use crate::transport::LinkCloser;

/// Identifier of one connection within a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub(crate) u64);

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe#{}", self.0)
    }
}

/// Condition variables the pipe's worker threads wait on.
#[derive(Debug, Default)]
pub struct PipeWake {
    /// Writer: outbound has a message, or the pipe went away
    pub outbound: Condvar,
    /// Reader: inbound has room, or the pipe went away
    pub inbound_space: Condvar,
}

impl PipeWake {
    pub fn notify_all(&self) {
        self.outbound.notify_all();
        self.inbound_space.notify_all();
    }
}

/// Socket-side state of one connection.
pub struct Pipe {
    id: PipeId,
    endpoint: EndpointId,
    peer: String,
    inbound: VecDeque<Bytes>,
    outbound: VecDeque<Bytes>,
    recv_hwm: usize,
    send_hwm: usize,
    in_flight: bool,
    wake: Arc<PipeWake>,
    closer: Arc<dyn LinkCloser>,
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("peer", &self.peer)
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl Pipe {
    pub fn new(
        id: PipeId,
        endpoint: EndpointId,
        peer: String,
        recv_hwm: usize,
        send_hwm: usize,
        closer: Arc<dyn LinkCloser>,
    ) -> Self {
        Self {
            id,
            endpoint,
            peer,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            recv_hwm: recv_hwm.max(1),
            send_hwm: send_hwm.max(1),
            in_flight: false,
            wake: Arc::new(PipeWake::default()),
            closer,
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> PipeId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub fn wake(&self) -> Arc<PipeWake> {
        self.wake.clone()
    }

    /// Whether one more outbound message fits.
    #[inline]
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.outbound.len() < self.send_hwm
    }

    #[inline]
    #[must_use]
    pub fn has_message(&self) -> bool {
        !self.inbound.is_empty()
    }

    /// Whether the reader may queue another inbound message.
    #[inline]
    #[must_use]
    pub fn inbound_full(&self) -> bool {
        self.inbound.len() >= self.recv_hwm
    }

    /// Queue `msg` for the writer. Returns the payload length.
    pub fn try_send(&mut self, msg: Bytes) -> Result<usize> {
        if !self.has_capacity() {
            return Err(SpineError::WouldBlock);
        }
        let len = msg.len();
        self.outbound.push_back(msg);
        self.wake.outbound.notify_one();
        Ok(len)
    }

    /// Queue `msg`, evicting the oldest queued message if the queue is full.
    pub fn push_dropping_oldest(&mut self, msg: Bytes) {
        if !self.has_capacity() {
            self.outbound.pop_front();
            trace!("[PIPE] {} full, dropped oldest message", self.id);
        }
        self.outbound.push_back(msg);
        self.wake.outbound.notify_one();
    }

    /// Pop the next inbound message.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        let msg = self.inbound.pop_front()?;
        self.wake.inbound_space.notify_one();
        Some(msg)
    }

    /// Reader side: queue a received message.
    pub fn push_inbound(&mut self, msg: Bytes) {
        self.inbound.push_back(msg);
    }

    /// Writer side: take the next message to write.
    pub fn pop_outbound(&mut self) -> Option<Bytes> {
        let msg = self.outbound.pop_front()?;
        self.in_flight = true;
        Some(msg)
    }

    /// Writer side: the last popped message has been written.
    pub fn finish_write(&mut self) {
        self.in_flight = false;
    }

    /// Whether anything is queued or still being written.
    #[must_use]
    pub fn has_pending_output(&self) -> bool {
        self.in_flight || !self.outbound.is_empty()
    }

    pub fn retain_inbound(&mut self, keep: impl FnMut(&Bytes) -> bool) {
        let before = self.inbound.len();
        self.inbound.retain(keep);
        if self.inbound.len() != before {
            self.wake.inbound_space.notify_one();
        }
    }

    /// Take every queued inbound message.
    pub fn take_inbound(&mut self) -> VecDeque<Bytes> {
        std::mem::take(&mut self.inbound)
    }

    pub fn clear_inbound(&mut self) {
        if !self.inbound.is_empty() {
            self.inbound.clear();
            self.wake.inbound_space.notify_one();
        }
    }

    /// Apply new queue bounds. Messages already queued beyond them stay.
    pub fn set_hwm(&mut self, recv_hwm: usize, send_hwm: usize) {
        self.recv_hwm = recv_hwm.max(1);
        self.send_hwm = send_hwm.max(1);
        self.wake.inbound_space.notify_one();
    }

    /// Shut the underlying link down and wake both workers.
    pub fn shutdown(&self) {
        self.closer.close();
        self.wake.notify_all();
    }
}

/// Pipe ids; sockets rarely have more than a handful of connections.
pub type PipeIds = SmallVec<[PipeId; 8]>;

/// The live connections of one socket, in rotation order.
#[derive(Debug, Default)]
pub struct PipeSet {
    pipes: HashMap<PipeId, Pipe>,
    order: PipeIds,
    send_cursor: usize,
    recv_cursor: usize,
    /// Complete messages salvaged from pipes that went away
    leftovers: VecDeque<Bytes>,
}

impl PipeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: PipeId) -> bool {
        self.pipes.contains_key(&id)
    }

    /// Add a pipe at the end of the rotation.
    pub fn insert(&mut self, pipe: Pipe) {
        let id = pipe.id();
        if self.pipes.insert(id, pipe).is_none() {
            self.order.push(id);
        }
    }

    /// Remove a pipe, keeping both cursors pointing at the same successor.
    pub fn remove(&mut self, id: PipeId) -> Option<Pipe> {
        let pipe = self.pipes.remove(&id)?;
        if let Some(pos) = self.order.iter().position(|p| *p == id) {
            self.order.remove(pos);
            for cursor in [&mut self.send_cursor, &mut self.recv_cursor] {
                if pos < *cursor {
                    *cursor -= 1;
                }
                if *cursor >= self.order.len() {
                    *cursor = 0;
                }
            }
        }
        Some(pipe)
    }

    #[must_use]
    pub fn get(&self, id: PipeId) -> Option<&Pipe> {
        self.pipes.get(&id)
    }

    /// Look a pipe up; a removed pipe means its connection is gone.
    pub fn get_mut(&mut self, id: PipeId) -> Result<&mut Pipe> {
        self.pipes.get_mut(&id).ok_or(SpineError::ConnectionClosed)
    }

    /// Pick the next pipe with outbound capacity and advance past it.
    pub fn next_writable(&mut self) -> Option<PipeId> {
        let id = self.scan(self.send_cursor, Pipe::has_capacity)?;
        self.send_cursor = self.successor(id);
        Some(id)
    }

    /// Pick the next pipe holding a message and advance past it.
    pub fn next_readable(&mut self) -> Option<PipeId> {
        let id = self.scan(self.recv_cursor, Pipe::has_message)?;
        self.recv_cursor = self.successor(id);
        Some(id)
    }

    #[must_use]
    pub fn any_writable(&self) -> bool {
        self.pipes.values().any(Pipe::has_capacity)
    }

    /// Keep the messages `pipe` already received deliverable after it is
    /// gone. Only meaningful for patterns with no per-pipe reply state.
    ///
    /// At most `limit` salvaged messages are held; the oldest go first.
    pub fn salvage(&mut self, pipe: &mut Pipe, limit: usize) {
        let messages = pipe.take_inbound();
        if messages.is_empty() {
            return;
        }
        trace!("[PIPE] Kept {} message(s) from {}", messages.len(), pipe.id());
        self.leftovers.extend(messages);

        let excess = self.leftovers.len().saturating_sub(limit.max(1));
        if excess > 0 {
            self.leftovers.drain(..excess);
            trace!("[PIPE] Leftover queue full, dropped {} oldest message(s)", excess);
        }
    }

    /// Salvaged messages still waiting to be received.
    #[must_use]
    pub fn leftover_count(&self) -> usize {
        self.leftovers.len()
    }

    /// Next message from any source: salvaged messages first, then pipes in
    /// turn.
    pub fn next_message(&mut self) -> Option<Bytes> {
        if let Some(msg) = self.leftovers.pop_front() {
            return Some(msg);
        }
        let source = self.next_readable()?;
        self.pipes.get_mut(&source)?.try_recv()
    }

    pub fn retain_leftovers(&mut self, keep: impl FnMut(&Bytes) -> bool) {
        self.leftovers.retain(keep);
    }

    #[must_use]
    pub fn any_readable(&self) -> bool {
        !self.leftovers.is_empty() || self.pipes.values().any(Pipe::has_message)
    }

    /// Every pipe can take one more message (false when there are none).
    #[must_use]
    pub fn all_writable(&self) -> bool {
        !self.pipes.is_empty() && self.pipes.values().all(Pipe::has_capacity)
    }

    #[must_use]
    pub fn has_pending_output(&self) -> bool {
        self.pipes.values().any(Pipe::has_pending_output)
    }

    pub fn set_hwm(&mut self, recv_hwm: usize, send_hwm: usize) {
        for pipe in self.pipes.values_mut() {
            pipe.set_hwm(recv_hwm, send_hwm);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pipe> {
        self.order.iter().filter_map(|id| self.pipes.get(id))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pipe> {
        self.pipes.values_mut()
    }

    /// Ids of the pipes created by `endpoint`, in rotation order.
    #[must_use]
    pub fn ids_for(&self, endpoint: EndpointId) -> PipeIds {
        self.iter().filter(|p| p.endpoint() == endpoint).map(Pipe::id).collect()
    }

    /// Remove every pipe.
    pub fn drain(&mut self) -> Vec<Pipe> {
        self.order.clear();
        self.send_cursor = 0;
        self.recv_cursor = 0;
        self.leftovers.clear();
        self.pipes.drain().map(|(_, pipe)| pipe).collect()
    }

    fn scan(&self, cursor: usize, ready: impl Fn(&Pipe) -> bool) -> Option<PipeId> {
        let n = self.order.len();
        (0..n)
            .map(|i| self.order[(cursor + i) % n])
            .find(|id| self.pipes.get(id).is_some_and(&ready))
    }

    fn successor(&self, id: PipeId) -> usize {
        let n = self.order.len().max(1);
        self.order
            .iter()
            .position(|p| *p == id)
            .map_or(0, |pos| (pos + 1) % n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCloser;
    impl LinkCloser for NoopCloser {
        fn close(&self) {}
    }

    fn pipe(id: u64, hwm: usize) -> Pipe {
        Pipe::new(
            PipeId(id),
            EndpointId(1),
            format!("peer-{id}"),
            hwm,
            hwm,
            Arc::new(NoopCloser),
        )
    }

    fn set_of(n: u64, hwm: usize) -> PipeSet {
        let mut set = PipeSet::new();
        for id in 0..n {
            set.insert(pipe(id, hwm));
        }
        set
    }

    #[test]
    fn test_try_send_respects_hwm() {
        let mut p = pipe(1, 2);
        assert_eq!(p.try_send(Bytes::from_static(b"abc")).unwrap(), 3);
        p.try_send(Bytes::new()).unwrap();
        assert!(matches!(p.try_send(Bytes::new()), Err(SpineError::WouldBlock)));
        assert!(!p.has_capacity());

        assert_eq!(p.pop_outbound().unwrap(), Bytes::from_static(b"abc"));
        assert!(p.has_capacity());
        assert!(p.has_pending_output());
    }

    #[test]
    fn test_drop_oldest() {
        let mut p = pipe(1, 2);
        for msg in [&b"1"[..], b"2", b"3"] {
            p.push_dropping_oldest(Bytes::copy_from_slice(msg));
        }
        assert_eq!(p.pop_outbound().unwrap(), Bytes::from_static(b"2"));
        assert_eq!(p.pop_outbound().unwrap(), Bytes::from_static(b"3"));
        p.finish_write();
        assert!(!p.has_pending_output());
    }

    #[test]
    fn test_round_robin_send() {
        let mut set = set_of(3, 10);
        let picks: Vec<u64> = (0..6).map(|_| set.next_writable().unwrap().0).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_round_robin_skips_full() {
        let mut set = set_of(3, 1);
        set.get_mut(PipeId(1)).unwrap().try_send(Bytes::new()).unwrap();
        let picks: Vec<u64> = (0..4).map(|_| set.next_writable().unwrap().0).collect();
        assert_eq!(picks, vec![0, 2, 0, 2]);
    }

    #[test]
    fn test_fair_queue_recv() {
        let mut set = set_of(3, 10);
        for id in [0, 2] {
            let p = set.get_mut(PipeId(id)).unwrap();
            p.push_inbound(Bytes::from_static(b"a"));
            p.push_inbound(Bytes::from_static(b"b"));
        }
        let order: Vec<u64> = (0..4)
            .map(|_| {
                let id = set.next_readable().unwrap();
                set.get_mut(id).unwrap().try_recv().unwrap();
                id.0
            })
            .collect();
        assert_eq!(order, vec![0, 2, 0, 2]);
        assert!(set.next_readable().is_none());
    }

    #[test]
    fn test_remove_keeps_rotation() {
        let mut set = set_of(4, 10);
        assert_eq!(set.next_writable(), Some(PipeId(0)));
        assert_eq!(set.next_writable(), Some(PipeId(1)));
        // Cursor now at pipe 2; removing an earlier pipe must not skip it.
        set.remove(PipeId(0)).unwrap();
        assert_eq!(set.next_writable(), Some(PipeId(2)));
        set.remove(PipeId(3)).unwrap();
        assert_eq!(set.next_writable(), Some(PipeId(1)));
        assert!(matches!(set.get_mut(PipeId(3)), Err(SpineError::ConnectionClosed)));
    }

    #[test]
    fn test_new_pipe_joins_rotation_at_end() {
        let mut set = set_of(2, 10);
        assert_eq!(set.next_writable(), Some(PipeId(0)));
        set.insert(pipe(9, 10));
        let picks: Vec<u64> = (0..3).map(|_| set.next_writable().unwrap().0).collect();
        assert_eq!(picks, vec![1, 9, 0]);
    }

    #[test]
    fn test_all_writable() {
        let mut set = PipeSet::new();
        assert!(!set.all_writable());
        set.insert(pipe(0, 1));
        set.insert(pipe(1, 1));
        assert!(set.all_writable());
        set.get_mut(PipeId(0)).unwrap().try_send(Bytes::new()).unwrap();
        assert!(!set.all_writable());
        assert!(set.any_writable());
    }

    #[test]
    fn test_ids_for_endpoint() {
        let mut set = set_of(2, 4);
        set.insert(Pipe::new(PipeId(7), EndpointId(2), String::new(), 4, 4, Arc::new(NoopCloser)));
        assert_eq!(set.ids_for(EndpointId(1)).as_slice(), &[PipeId(0), PipeId(1)]);
        assert_eq!(set.ids_for(EndpointId(2)).as_slice(), &[PipeId(7)]);
        assert!(set.ids_for(EndpointId(3)).is_empty());
    }

    #[test]
    fn test_salvaged_messages_come_first() {
        let mut set = set_of(2, 4);
        set.get_mut(PipeId(0)).unwrap().push_inbound(Bytes::from_static(b"orphan-1"));
        set.get_mut(PipeId(0)).unwrap().push_inbound(Bytes::from_static(b"orphan-2"));
        set.get_mut(PipeId(1)).unwrap().push_inbound(Bytes::from_static(b"live"));

        let mut gone = set.remove(PipeId(0)).unwrap();
        set.salvage(&mut gone, 4);
        assert!(!gone.has_message());

        assert_eq!(set.next_message().unwrap(), Bytes::from_static(b"orphan-1"));
        set.retain_leftovers(|msg| msg.as_ref() != b"orphan-2");
        assert_eq!(set.next_message().unwrap(), Bytes::from_static(b"live"));
        assert!(set.next_message().is_none());
        assert!(!set.any_readable());
    }

    #[test]
    fn test_salvage_is_bounded() {
        let mut set = set_of(1, 3);
        for round in 0..4u8 {
            let mut gone = pipe(10 + u64::from(round), 3);
            for i in 0..3u8 {
                gone.push_inbound(Bytes::from(vec![round, i]));
            }
            set.salvage(&mut gone, 3);
            assert!(set.leftover_count() <= 3);
        }

        // Only the newest messages survive.
        let kept: Vec<_> = std::iter::from_fn(|| set.next_message()).collect();
        assert_eq!(
            kept,
            vec![
                Bytes::from(vec![3, 0]),
                Bytes::from(vec![3, 1]),
                Bytes::from(vec![3, 2]),
            ]
        );
    }
}
