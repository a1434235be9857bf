//! Pattern dispatch.
//!
//! [`Pattern`] is a closed enum with one variant per socket type. The socket
//! core only ever talks to it through the same small capability set:
//!
//! | Hook             | Called when                                   |
//! |------------------|-----------------------------------------------|
//! | `try_send`       | the caller sends (non-blocking attempt)       |
//! | `try_recv`       | the caller receives (non-blocking attempt)    |
//! | `can_send`       | readiness is recomputed                       |
//! | `can_recv`       | readiness is recomputed                       |
//! | `accept_inbound` | a reader thread is about to queue a message   |
//! | `pipe_added`     | a connection joins the live set               |
//! | `pipe_removed`   | a connection leaves the live set              |
//! | `tick`           | a caller is about to wait (timers)            |
//!
//! All hooks run under the socket lock. `can_send`/`can_recv` must agree
//! with `try_send`/`try_recv`: whenever a `try_*` call would return
//! `WouldBlock`, the matching `can_*` must be false, because callers wait
//! for readiness to change before retrying.

use std::time::{Duration, Instant};

use bytes::Bytes;
use spine_core::error::{Result, SpineError};
use spine_core::options::SocketOptions;
use spine_core::socket_type::SocketType;

use crate::bus::Bus;
use crate::pipe::{PipeId, PipeSet};
use crate::publisher::Pub;
use crate::pull::Pull;
use crate::push::Push;
use crate::rep::Rep;
use crate::req::Req;
use crate::subscriber::Sub;

/// Per-socket pattern state.
#[derive(Debug)]
pub enum Pattern {
    Req(Req),
    Rep(Rep),
    Pub(Pub),
    Sub(Sub),
    Push(Push),
    Pull(Pull),
    Bus(Bus),
}

impl Pattern {
    #[must_use]
    pub fn new(socket_type: SocketType, options: &SocketOptions) -> Self {
        match socket_type {
            SocketType::Req => Self::Req(Req::new(options.resend_ivl)),
            SocketType::Rep => Self::Rep(Rep::new()),
            SocketType::Pub => Self::Pub(Pub::new()),
            SocketType::Sub => Self::Sub(Sub::new()),
            SocketType::Push => Self::Push(Push::new()),
            SocketType::Pull => Self::Pull(Pull::new()),
            SocketType::Bus => Self::Bus(Bus::new()),
        }
    }

    #[must_use]
    pub const fn socket_type(&self) -> SocketType {
        match self {
            Self::Req(_) => SocketType::Req,
            Self::Rep(_) => SocketType::Rep,
            Self::Pub(_) => SocketType::Pub,
            Self::Sub(_) => SocketType::Sub,
            Self::Push(_) => SocketType::Push,
            Self::Pull(_) => SocketType::Pull,
            Self::Bus(_) => SocketType::Bus,
        }
    }

    /// Attempt to send without waiting.
    pub fn try_send(&mut self, pipes: &mut PipeSet, msg: Bytes, now: Instant) -> Result<usize> {
        match self {
            Self::Req(req) => req.try_send(pipes, msg, now),
            Self::Rep(rep) => rep.try_send(pipes, msg),
            Self::Pub(publisher) => Ok(publisher.send(pipes, msg)),
            Self::Push(push) => push.try_send(pipes, msg),
            Self::Bus(bus) => bus.try_send(pipes, msg),
            Self::Sub(_) | Self::Pull(_) => Err(self.unsupported("send")),
        }
    }

    /// Attempt to receive without waiting.
    pub fn try_recv(&mut self, pipes: &mut PipeSet) -> Result<Bytes> {
        match self {
            Self::Req(req) => req.try_recv(pipes),
            Self::Rep(rep) => rep.try_recv(pipes),
            Self::Sub(sub) => sub.try_recv(pipes),
            Self::Pull(pull) => pull.try_recv(pipes),
            Self::Bus(bus) => bus.try_recv(pipes),
            Self::Pub(_) | Self::Push(_) => Err(self.unsupported("recv")),
        }
    }

    #[must_use]
    pub fn can_send(&self, pipes: &PipeSet) -> bool {
        match self {
            Self::Req(req) => req.can_send(pipes),
            Self::Rep(rep) => rep.can_send(pipes),
            Self::Pub(_) => true,
            Self::Push(_) => pipes.any_writable(),
            Self::Bus(bus) => bus.can_send(pipes),
            Self::Sub(_) | Self::Pull(_) => false,
        }
    }

    #[must_use]
    pub fn can_recv(&self, pipes: &PipeSet) -> bool {
        match self {
            Self::Req(req) => req.can_recv(pipes),
            Self::Rep(rep) => rep.can_recv(pipes),
            Self::Sub(_) | Self::Pull(_) | Self::Bus(_) => pipes.any_readable(),
            Self::Pub(_) | Self::Push(_) => false,
        }
    }

    /// Filter (and possibly rewrite) a message before it is queued.
    ///
    /// Returns `false` to drop it.
    pub fn accept_inbound(&mut self, _from: PipeId, msg: &mut Bytes) -> bool {
        match self {
            Self::Req(req) => req.accept_inbound(msg),
            Self::Rep(_) => Rep::accept_inbound(msg),
            Self::Sub(sub) => sub.accept_inbound(msg),
            Self::Pull(_) | Self::Bus(_) => true,
            // Send-only patterns have nowhere to deliver to.
            Self::Pub(_) | Self::Push(_) => false,
        }
    }

    /// Whether messages already received on a dying connection stay
    /// deliverable. REQ and REP tie messages to their connection, so theirs
    /// are dropped.
    #[must_use]
    pub const fn salvages_inbound(&self) -> bool {
        matches!(self, Self::Sub(_) | Self::Pull(_) | Self::Bus(_))
    }

    pub fn pipe_added(&mut self, id: PipeId, pipes: &mut PipeSet, now: Instant) {
        if let Self::Req(req) = self {
            req.pipe_added(id, pipes, now);
        }
    }

    pub fn pipe_removed(&mut self, id: PipeId, pipes: &mut PipeSet, now: Instant) {
        if let Self::Req(req) = self {
            req.pipe_removed(id, pipes, now);
        }
    }

    /// Run timers. Returns the next instant `tick` wants to run again.
    pub fn tick(&mut self, pipes: &mut PipeSet, now: Instant) -> Option<Instant> {
        match self {
            Self::Req(req) => req.tick(pipes, now),
            _ => None,
        }
    }

    /// A blocking receive hit its timeout.
    pub fn recv_timed_out(&mut self, pipes: &mut PipeSet) {
        if let Self::Req(req) = self {
            req.recv_timed_out(pipes);
        }
    }

    pub fn subscribe(&mut self, topic: Bytes) -> Result<()> {
        match self {
            Self::Sub(sub) => {
                sub.subscribe(topic);
                Ok(())
            }
            _ => Err(self.unsupported("subscribe")),
        }
    }

    pub fn unsubscribe(&mut self, topic: &[u8], pipes: &mut PipeSet) -> Result<()> {
        match self {
            Self::Sub(sub) => sub.unsubscribe(topic, pipes),
            _ => Err(self.unsupported("unsubscribe")),
        }
    }

    pub fn set_resend_ivl(&mut self, ivl: Duration) {
        if let Self::Req(req) = self {
            req.set_resend_ivl(ivl);
        }
    }

    fn unsupported(&self, operation: &'static str) -> SpineError {
        SpineError::UnsupportedOperation {
            operation,
            socket_type: self.socket_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spine_core::error::ErrorKind;

    #[test]
    fn test_one_variant_per_type() {
        let opts = SocketOptions::default();
        for socket_type in SocketType::ALL {
            assert_eq!(Pattern::new(socket_type, &opts).socket_type(), socket_type);
        }
    }

    #[test]
    fn test_unsupported_directions() {
        let opts = SocketOptions::default();
        let mut pipes = PipeSet::new();
        let now = Instant::now();

        let mut sub = Pattern::new(SocketType::Sub, &opts);
        let err = sub.try_send(&mut pipes, Bytes::new(), now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut push = Pattern::new(SocketType::Push, &opts);
        assert!(push.try_recv(&mut pipes).is_err());
        assert!(push.subscribe(Bytes::from_static(b"x")).is_err());
        assert!(!push.can_recv(&pipes));
    }

    #[test]
    fn test_idle_readiness() {
        let opts = SocketOptions::default();
        let pipes = PipeSet::new();
        assert!(Pattern::new(SocketType::Pub, &opts).can_send(&pipes));
        assert!(Pattern::new(SocketType::Bus, &opts).can_send(&pipes));
        assert!(!Pattern::new(SocketType::Push, &opts).can_send(&pipes));
        assert!(!Pattern::new(SocketType::Req, &opts).can_send(&pipes));
        assert!(!Pattern::new(SocketType::Rep, &opts).can_send(&pipes));
        assert!(!Pattern::new(SocketType::Pull, &opts).can_recv(&pipes));
    }
}
