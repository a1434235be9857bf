//! PUSH pattern: load-balance messages across pullers.
//!
//! Each message goes to exactly one connection, chosen round robin among
//! those with queue space. Nothing is ever dropped: when every connection is
//! full (or there are none) the send waits or fails with `WouldBlock`.

use bytes::Bytes;
use spine_core::error::{Result, SpineError};

use crate::pipe::PipeSet;

#[derive(Debug, Default)]
pub struct Push;

impl Push {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    pub fn try_send(&mut self, pipes: &mut PipeSet, msg: Bytes) -> Result<usize> {
        let target = pipes.next_writable().ok_or(SpineError::WouldBlock)?;
        pipes.get_mut(target)?.try_send(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointId;
    use crate::pipe::{Pipe, PipeId};
    use crate::transport::LinkCloser;
    use spine_core::error::ErrorKind;
    use std::sync::Arc;

    struct NoopCloser;
    impl LinkCloser for NoopCloser {
        fn close(&self) {}
    }

    #[test]
    fn test_even_distribution_in_order() {
        let mut set = PipeSet::new();
        for id in 0..3 {
            set.insert(Pipe::new(
                PipeId(id),
                EndpointId(0),
                String::new(),
                8,
                8,
                Arc::new(NoopCloser),
            ));
        }
        let mut push = Push::new();
        for i in 0..9u8 {
            push.try_send(&mut set, Bytes::copy_from_slice(&[i])).unwrap();
        }

        for id in 0..3u64 {
            let pipe = set.get_mut(PipeId(id)).unwrap();
            let got: Vec<u8> = std::iter::from_fn(|| pipe.pop_outbound()).map(|m| m[0]).collect();
            let want: Vec<u8> = (0..3).map(|k| k * 3 + id as u8).collect();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn test_full_would_block() {
        let mut set = PipeSet::new();
        let mut push = Push::new();
        assert_eq!(
            push.try_send(&mut set, Bytes::new()).unwrap_err().kind(),
            ErrorKind::WouldBlock
        );

        set.insert(Pipe::new(PipeId(0), EndpointId(0), String::new(), 1, 1, Arc::new(NoopCloser)));
        push.try_send(&mut set, Bytes::new()).unwrap();
        assert_eq!(
            push.try_send(&mut set, Bytes::new()).unwrap_err().kind(),
            ErrorKind::WouldBlock
        );
    }
}
