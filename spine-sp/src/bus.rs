//! BUS pattern: many-to-many broadcast with backpressure.
//!
//! A message goes to every directly connected peer. Unlike PUB, nothing is
//! dropped: the send waits until every connection has room, then queues the
//! message to all of them at once, so either every peer gets it or none
//! does. With no peers the message is dropped. Receiving is fair-queued.

use bytes::Bytes;
use spine_core::error::{Result, SpineError};
use tracing::trace;

use crate::pipe::PipeSet;

#[derive(Debug, Default)]
pub struct Bus;

impl Bus {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    pub fn try_send(&mut self, pipes: &mut PipeSet, msg: Bytes) -> Result<usize> {
        if pipes.is_empty() {
            trace!("[BUS] No peers, dropping {} byte message", msg.len());
            return Ok(msg.len());
        }
        if !pipes.all_writable() {
            return Err(SpineError::WouldBlock);
        }
        for pipe in pipes.iter_mut() {
            pipe.try_send(msg.clone())?;
        }
        Ok(msg.len())
    }

    #[must_use]
    pub fn can_send(&self, pipes: &PipeSet) -> bool {
        pipes.is_empty() || pipes.all_writable()
    }

    pub fn try_recv(&mut self, pipes: &mut PipeSet) -> Result<Bytes> {
        pipes.next_message().ok_or(SpineError::WouldBlock)
    }
}
