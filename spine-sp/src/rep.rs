//! REP pattern state machine.
//!
//! A REP socket receives a request from any connected REQ peer (fair-queued),
//! remembers where it came from, and sends its reply back to exactly that
//! connection:
//!
//! ```text
//!        recv                  send
//! Idle ────────▶ AwaitingReply ────────▶ Idle
//! ```
//!
//! Receiving again while a reply is owed abandons the earlier request. If
//! the requester disconnects before the reply is sent, `send` fails with
//! `ConnectionClosed` and the socket returns to `Idle`; the requester will
//! resend its request elsewhere.

use bytes::{BufMut, Bytes, BytesMut};
use spine_core::error::{Result, SpineError};
use tracing::{debug, trace};

use crate::pipe::{Pipe, PipeId, PipeSet};
use crate::req::{REQUEST_ID_FLAG, REQUEST_ID_LEN};

#[derive(Debug)]
enum RepState {
    Idle,
    AwaitingReply {
        /// Connection the request came from
        pipe: PipeId,
        /// Request id to echo back
        header: Bytes,
    },
}

/// REP socket state.
#[derive(Debug)]
pub struct Rep {
    state: RepState,
}

impl Default for Rep {
    fn default() -> Self {
        Self::new()
    }
}

impl Rep {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RepState::Idle,
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, RepState::Idle)
    }

    /// Take the next request.
    pub fn try_recv(&mut self, pipes: &mut PipeSet) -> Result<Bytes> {
        let source = pipes.next_readable().ok_or(SpineError::WouldBlock)?;
        let request = pipes.get_mut(source)?.try_recv().ok_or(SpineError::WouldBlock)?;

        if let RepState::AwaitingReply { pipe, .. } = &self.state {
            debug!("[REP] Abandoning unanswered request from {}", pipe);
        }
        let header = request.slice(..REQUEST_ID_LEN);
        self.state = RepState::AwaitingReply {
            pipe: source,
            header,
        };
        trace!("[REP] Request from {}", source);
        Ok(request.slice(REQUEST_ID_LEN..))
    }

    /// Send the reply to the connection the last request came from.
    ///
    /// # Errors
    ///
    /// - `FsmViolation` if no request has been received
    /// - `ConnectionClosed` if the requester is gone (the request is dropped)
    /// - `WouldBlock` if the requester's queue is full (state unchanged)
    pub fn try_send(&mut self, pipes: &mut PipeSet, body: Bytes) -> Result<usize> {
        let RepState::AwaitingReply { pipe, header } = &self.state else {
            return Err(SpineError::FsmViolation(
                "REP socket cannot send before receiving a request",
            ));
        };
        let (target, header) = (*pipe, header.clone());

        let connection = match pipes.get_mut(target) {
            Ok(connection) => connection,
            Err(err) => {
                debug!("[REP] Requester {} is gone, dropping reply", target);
                self.state = RepState::Idle;
                return Err(err);
            }
        };

        let mut reply = BytesMut::with_capacity(header.len() + body.len());
        reply.put_slice(&header);
        reply.put_slice(&body);
        connection.try_send(reply.freeze())?;

        self.state = RepState::Idle;
        Ok(body.len())
    }

    #[must_use]
    pub fn can_send(&self, pipes: &PipeSet) -> bool {
        match &self.state {
            RepState::Idle => false,
            // A vanished requester fails fast, which counts as ready.
            RepState::AwaitingReply { pipe, .. } => {
                pipes.get(*pipe).map_or(true, Pipe::has_capacity)
            }
        }
    }

    #[must_use]
    pub fn can_recv(&self, pipes: &PipeSet) -> bool {
        pipes.any_readable()
    }

    /// Only messages carrying a request id are requests.
    #[must_use]
    pub fn accept_inbound(msg: &Bytes) -> bool {
        if msg.len() < REQUEST_ID_LEN {
            trace!("[REP] Dropping request without id");
            return false;
        }
        let id = u32::from_be_bytes([msg[0], msg[1], msg[2], msg[3]]);
        if id & REQUEST_ID_FLAG == 0 {
            trace!("[REP] Dropping request with malformed id");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointId;
    use crate::req::with_request_id;
    use crate::transport::LinkCloser;
    use spine_core::error::ErrorKind;
    use std::sync::Arc;

    struct NoopCloser;
    impl LinkCloser for NoopCloser {
        fn close(&self) {}
    }

    fn pipes(n: u64, hwm: usize) -> PipeSet {
        let mut set = PipeSet::new();
        for id in 0..n {
            set.insert(Pipe::new(
                PipeId(id),
                EndpointId(0),
                String::new(),
                hwm,
                hwm,
                Arc::new(NoopCloser),
            ));
        }
        set
    }

    fn deliver(set: &mut PipeSet, pipe: u64, id: u32, body: &[u8]) {
        let msg = with_request_id(id, body);
        assert!(Rep::accept_inbound(&msg));
        set.get_mut(PipeId(pipe)).unwrap().push_inbound(msg);
    }

    #[test]
    fn test_send_before_recv_is_fsm_violation() {
        let mut set = pipes(1, 4);
        let mut rep = Rep::new();
        let err = rep.try_send(&mut set, Bytes::from_static(b"early")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FsmViolation);
    }

    #[test]
    fn test_reply_goes_to_requester_with_id() {
        let mut set = pipes(2, 4);
        let mut rep = Rep::new();
        deliver(&mut set, 1, 0x8000_0042, b"question");

        assert_eq!(rep.try_recv(&mut set).unwrap(), Bytes::from_static(b"question"));
        assert!(rep.can_send(&set));
        assert_eq!(rep.try_send(&mut set, Bytes::from_static(b"answer")).unwrap(), 6);
        assert!(rep.is_idle());

        let wire = set.get_mut(PipeId(1)).unwrap().pop_outbound().unwrap();
        assert_eq!(wire, with_request_id(0x8000_0042, b"answer"));
        assert!(set.get_mut(PipeId(0)).unwrap().pop_outbound().is_none());
    }

    #[test]
    fn test_vanished_requester() {
        let mut set = pipes(1, 4);
        let mut rep = Rep::new();
        deliver(&mut set, 0, 0x8000_0001, b"q");
        rep.try_recv(&mut set).unwrap();

        set.remove(PipeId(0));
        let err = rep.try_send(&mut set, Bytes::from_static(b"a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
        assert!(rep.is_idle());
    }

    #[test]
    fn test_full_requester_keeps_state() {
        let mut set = pipes(1, 1);
        let mut rep = Rep::new();
        deliver(&mut set, 0, 0x8000_0001, b"q");
        rep.try_recv(&mut set).unwrap();
        set.get_mut(PipeId(0)).unwrap().try_send(Bytes::new()).unwrap();

        assert!(!rep.can_send(&set));
        let err = rep.try_send(&mut set, Bytes::from_static(b"a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert!(!rep.is_idle());
    }

    #[test]
    fn test_recv_again_replaces_request() {
        let mut set = pipes(2, 4);
        let mut rep = Rep::new();
        deliver(&mut set, 0, 0x8000_0001, b"first");
        deliver(&mut set, 1, 0x8000_0002, b"second");

        assert_eq!(rep.try_recv(&mut set).unwrap(), Bytes::from_static(b"first"));
        assert_eq!(rep.try_recv(&mut set).unwrap(), Bytes::from_static(b"second"));
        rep.try_send(&mut set, Bytes::from_static(b"r")).unwrap();
        assert!(set.get_mut(PipeId(0)).unwrap().pop_outbound().is_none());
        assert!(set.get_mut(PipeId(1)).unwrap().pop_outbound().is_some());
    }

    #[test]
    fn test_rejects_requests_without_id() {
        assert!(!Rep::accept_inbound(&Bytes::from_static(b"abc")));
        assert!(!Rep::accept_inbound(&Bytes::from_static(&[0, 0, 0, 1, b'x'])));
    }
}
