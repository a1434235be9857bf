//! REQ pattern state machine.
//!
//! A REQ socket alternates strictly between sending a request and receiving
//! its reply:
//!
//! ```text
//!        send                 recv
//! Idle ────────▶ AwaitingReply ────────▶ Idle
//!                     │  ▲
//!                     └──┘ resend (peer lost, or resend interval elapsed)
//! ```
//!
//! Every request is prefixed with a 4-byte big-endian request id whose top
//! bit is set. The REP side echoes it back, so a reply can be matched to the
//! request that is outstanding. Replies to older (already resent or
//! abandoned) requests are dropped on arrival and never reach `recv`.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use spine_sp::pipe::PipeSet;
//! use spine_sp::req::Req;
//! use std::time::{Duration, Instant};
//!
//! let mut req = Req::new(Duration::from_secs(60));
//! let mut pipes = PipeSet::new();
//!
//! // No peer yet: nothing can take the request.
//! let err = req.try_send(&mut pipes, Bytes::from_static(b"hi"), Instant::now());
//! assert!(err.is_err());
//! assert!(req.is_idle());
//! ```

use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use spine_core::error::{Result, SpineError};
use tracing::{debug, trace};

use crate::pipe::{PipeId, PipeSet};

/// Length of the request id header.
pub const REQUEST_ID_LEN: usize = 4;

/// Bit marking the last (and for direct connections only) id in a header.
pub const REQUEST_ID_FLAG: u32 = 0x8000_0000;

#[derive(Debug)]
enum ReqState {
    /// Ready to send a request
    Idle,
    /// Request sent, waiting for its reply
    AwaitingReply {
        id: u32,
        /// Request as it goes on the wire, header included
        request: Bytes,
        /// Connection currently holding the request; `None` while no
        /// connection could take it
        pipe: Option<PipeId>,
        resend_at: Instant,
    },
}

/// REQ socket state.
#[derive(Debug)]
pub struct Req {
    state: ReqState,
    next_id: u32,
    resend_ivl: Duration,
}

impl Req {
    /// New REQ state machine; the first request id is random.
    #[must_use]
    pub fn new(resend_ivl: Duration) -> Self {
        Self {
            state: ReqState::Idle,
            next_id: rand::random::<u32>(),
            resend_ivl,
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, ReqState::Idle)
    }

    pub fn set_resend_ivl(&mut self, ivl: Duration) {
        self.resend_ivl = ivl;
    }

    /// Send a request to the next connection with capacity.
    ///
    /// # Errors
    ///
    /// - `FsmViolation` while a request is outstanding
    /// - `WouldBlock` if no connection can take the request (state unchanged)
    pub fn try_send(&mut self, pipes: &mut PipeSet, body: Bytes, now: Instant) -> Result<usize> {
        if !self.is_idle() {
            return Err(SpineError::FsmViolation(
                "REQ socket cannot send while awaiting a reply",
            ));
        }

        let target = pipes.next_writable().ok_or(SpineError::WouldBlock)?;
        let id = self.next_id | REQUEST_ID_FLAG;
        let request = with_request_id(id, &body);
        pipes.get_mut(target)?.try_send(request.clone())?;

        self.next_id = self.next_id.wrapping_add(1);
        self.state = ReqState::AwaitingReply {
            id,
            request,
            pipe: Some(target),
            resend_at: now + self.resend_ivl,
        };
        debug!("[REQ] Sent request {:#010x} via {}", id, target);
        Ok(body.len())
    }

    /// Take the reply to the outstanding request.
    ///
    /// # Errors
    ///
    /// - `FsmViolation` if no request is outstanding
    /// - `WouldBlock` if the reply has not arrived
    pub fn try_recv(&mut self, pipes: &mut PipeSet) -> Result<Bytes> {
        if self.is_idle() {
            return Err(SpineError::FsmViolation(
                "REQ socket cannot receive before sending a request",
            ));
        }

        let source = pipes.next_readable().ok_or(SpineError::WouldBlock)?;
        let reply = pipes.get_mut(source)?.try_recv().ok_or(SpineError::WouldBlock)?;

        // A duplicate reply to a resent request may already be queued.
        for pipe in pipes.iter_mut() {
            pipe.clear_inbound();
        }
        self.state = ReqState::Idle;
        Ok(reply)
    }

    #[must_use]
    pub fn can_send(&self, pipes: &PipeSet) -> bool {
        self.is_idle() && pipes.any_writable()
    }

    #[must_use]
    pub fn can_recv(&self, pipes: &PipeSet) -> bool {
        !self.is_idle() && pipes.any_readable()
    }

    /// Filter an arriving message. Only the reply to the outstanding request
    /// is kept, with its id stripped.
    pub fn accept_inbound(&self, msg: &mut Bytes) -> bool {
        let ReqState::AwaitingReply { id, .. } = self.state else {
            trace!("[REQ] Dropping unsolicited reply");
            return false;
        };
        if msg.len() < REQUEST_ID_LEN {
            trace!("[REQ] Dropping reply without request id");
            return false;
        }
        let got = u32::from_be_bytes([msg[0], msg[1], msg[2], msg[3]]);
        if got != id {
            trace!("[REQ] Dropping stale reply {:#010x} (want {:#010x})", got, id);
            return false;
        }
        *msg = msg.slice(REQUEST_ID_LEN..);
        true
    }

    /// A new connection can pick up a request nothing else could take.
    pub fn pipe_added(&mut self, added: PipeId, pipes: &mut PipeSet, now: Instant) {
        if let ReqState::AwaitingReply { pipe: None, .. } = self.state {
            self.resend_via(pipes, Some(added), now);
        }
    }

    /// The connection holding the request is gone: resend it elsewhere.
    pub fn pipe_removed(&mut self, removed: PipeId, pipes: &mut PipeSet, now: Instant) {
        if let ReqState::AwaitingReply { pipe: Some(holder), .. } = self.state {
            if holder == removed {
                debug!("[REQ] {} lost with request in flight, resending", removed);
                self.resend_via(pipes, None, now);
            }
        }
    }

    /// Resend an overdue request. Returns when to look again.
    pub fn tick(&mut self, pipes: &mut PipeSet, now: Instant) -> Option<Instant> {
        let ReqState::AwaitingReply { resend_at, pipe, .. } = self.state else {
            return None;
        };
        if now >= resend_at || pipe.is_none() {
            if now >= resend_at {
                debug!("[REQ] No reply within {:?}, resending", self.resend_ivl);
            }
            self.resend_via(pipes, None, now);
        }
        match self.state {
            ReqState::AwaitingReply { resend_at, .. } => Some(resend_at),
            ReqState::Idle => None,
        }
    }

    /// A blocking receive gave up: abandon the request.
    pub fn recv_timed_out(&mut self, pipes: &mut PipeSet) {
        if !self.is_idle() {
            debug!("[REQ] Receive timed out, abandoning request");
            for pipe in pipes.iter_mut() {
                pipe.clear_inbound();
            }
            self.state = ReqState::Idle;
        }
    }

    fn resend_via(&mut self, pipes: &mut PipeSet, preferred: Option<PipeId>, now: Instant) {
        let resend_ivl = self.resend_ivl;
        let ReqState::AwaitingReply {
            request,
            pipe,
            resend_at,
            ..
        } = &mut self.state
        else {
            return;
        };

        let target = preferred
            .filter(|id| pipes.get(*id).is_some_and(|p| p.has_capacity()))
            .or_else(|| pipes.next_writable());
        *pipe = target.and_then(|id| {
            let p = pipes.get_mut(id).ok()?;
            p.try_send(request.clone()).ok().map(|_| id)
        });
        *resend_at = now + resend_ivl;
    }
}

/// Prefix `body` with a request id header.
#[must_use]
pub fn with_request_id(id: u32, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(REQUEST_ID_LEN + body.len());
    out.put_u32(id);
    out.extend_from_slice(body);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointId;
    use crate::pipe::Pipe;
    use crate::transport::LinkCloser;
    use spine_core::error::ErrorKind;
    use std::sync::Arc;

    struct NoopCloser;
    impl LinkCloser for NoopCloser {
        fn close(&self) {}
    }

    fn pipes(n: u64) -> PipeSet {
        let mut set = PipeSet::new();
        for id in 0..n {
            set.insert(Pipe::new(
                PipeId(id),
                EndpointId(0),
                String::new(),
                8,
                8,
                Arc::new(NoopCloser),
            ));
        }
        set
    }

    fn sent_request(set: &mut PipeSet, id: u64) -> Bytes {
        set.get_mut(PipeId(id)).unwrap().pop_outbound().unwrap()
    }

    fn reply_for(request: &Bytes, body: &[u8]) -> Bytes {
        with_request_id(u32::from_be_bytes(request[..4].try_into().unwrap()), body)
    }

    #[test]
    fn test_double_send_is_fsm_violation() {
        let mut set = pipes(1);
        let mut req = Req::new(Duration::from_secs(60));
        let now = Instant::now();
        assert_eq!(req.try_send(&mut set, Bytes::from_static(b"one"), now).unwrap(), 3);
        let err = req.try_send(&mut set, Bytes::from_static(b"two"), now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FsmViolation);
    }

    #[test]
    fn test_recv_before_send_is_fsm_violation() {
        let mut set = pipes(1);
        let mut req = Req::new(Duration::from_secs(60));
        assert_eq!(req.try_recv(&mut set).unwrap_err().kind(), ErrorKind::FsmViolation);
    }

    #[test]
    fn test_request_carries_flagged_id() {
        let mut set = pipes(1);
        let mut req = Req::new(Duration::from_secs(60));
        req.try_send(&mut set, Bytes::from_static(b"ping"), Instant::now()).unwrap();

        let wire = sent_request(&mut set, 0);
        assert_eq!(wire.len(), 8);
        assert!(wire[0] & 0x80 != 0);
        assert_eq!(&wire[4..], b"ping");
    }

    #[test]
    fn test_reply_matching() {
        let mut set = pipes(1);
        let mut req = Req::new(Duration::from_secs(60));
        req.try_send(&mut set, Bytes::from_static(b"ping"), Instant::now()).unwrap();
        let wire = sent_request(&mut set, 0);

        let sent_id = u32::from_be_bytes(wire[..4].try_into().unwrap());
        let mut stale = with_request_id(0x8000_0001 ^ sent_id, b"old");
        assert!(!req.accept_inbound(&mut stale));

        let mut good = reply_for(&wire, b"pong");
        assert!(req.accept_inbound(&mut good));
        assert_eq!(good, Bytes::from_static(b"pong"));

        set.get_mut(PipeId(0)).unwrap().push_inbound(good);
        assert!(req.can_recv(&set));
        assert_eq!(req.try_recv(&mut set).unwrap(), Bytes::from_static(b"pong"));
        assert!(req.is_idle());

        let mut late = reply_for(&wire, b"pong again");
        assert!(!req.accept_inbound(&mut late));
    }

    #[test]
    fn test_consecutive_requests_use_new_ids() {
        let mut set = pipes(1);
        let mut req = Req::new(Duration::from_secs(60));
        let now = Instant::now();

        req.try_send(&mut set, Bytes::from_static(b"a"), now).unwrap();
        let first = sent_request(&mut set, 0);
        req.recv_timed_out(&mut set);
        req.try_send(&mut set, Bytes::from_static(b"b"), now).unwrap();
        let second = sent_request(&mut set, 0);
        assert_ne!(first[..4], second[..4]);
    }

    #[test]
    fn test_resend_when_holder_disconnects() {
        let mut set = pipes(2);
        let mut req = Req::new(Duration::from_secs(60));
        let now = Instant::now();
        req.try_send(&mut set, Bytes::from_static(b"job"), now).unwrap();
        let original = sent_request(&mut set, 0);

        set.remove(PipeId(0));
        req.pipe_removed(PipeId(0), &mut set, now);
        assert_eq!(sent_request(&mut set, 1), original);
    }

    #[test]
    fn test_request_waits_for_new_connection() {
        let mut set = pipes(1);
        let mut req = Req::new(Duration::from_secs(60));
        let now = Instant::now();
        req.try_send(&mut set, Bytes::from_static(b"job"), now).unwrap();
        let original = sent_request(&mut set, 0);

        set.remove(PipeId(0));
        req.pipe_removed(PipeId(0), &mut set, now);
        assert!(!req.is_idle());

        set.insert(Pipe::new(PipeId(7), EndpointId(0), String::new(), 8, 8, Arc::new(NoopCloser)));
        req.pipe_added(PipeId(7), &mut set, now);
        assert_eq!(sent_request(&mut set, 7), original);
    }

    #[test]
    fn test_resend_interval() {
        let mut set = pipes(2);
        let mut req = Req::new(Duration::from_millis(100));
        let start = Instant::now();
        req.try_send(&mut set, Bytes::from_static(b"slow"), start).unwrap();
        let original = sent_request(&mut set, 0);

        assert_eq!(req.tick(&mut set, start), Some(start + Duration::from_millis(100)));
        assert!(set.get_mut(PipeId(1)).unwrap().pop_outbound().is_none());

        let later = start + Duration::from_millis(150);
        let next = req.tick(&mut set, later).unwrap();
        assert_eq!(next, later + Duration::from_millis(100));
        assert_eq!(sent_request(&mut set, 1), original);
    }

    #[test]
    fn test_no_peer_would_block() {
        let mut set = PipeSet::new();
        let mut req = Req::new(Duration::from_secs(60));
        let err = req.try_send(&mut set, Bytes::from_static(b"x"), Instant::now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert!(req.is_idle());
    }
}
