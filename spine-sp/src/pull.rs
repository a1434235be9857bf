//! PULL pattern: fair-queue messages from pushers.

use bytes::Bytes;
use spine_core::error::{Result, SpineError};

use crate::pipe::PipeSet;

#[derive(Debug, Default)]
pub struct Pull;

impl Pull {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Next message, taking connections in turn.
    pub fn try_recv(&mut self, pipes: &mut PipeSet) -> Result<Bytes> {
        pipes.next_message().ok_or(SpineError::WouldBlock)
    }
}
