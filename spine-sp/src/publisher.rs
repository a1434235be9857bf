//! PUB pattern: broadcast without backpressure.
//!
//! Every message is queued to every live connection. A subscriber that
//! cannot keep up loses its oldest queued messages; the publisher itself
//! never blocks, and a message published with no subscribers is dropped.
//!
//! Topic filtering happens on the subscriber side, so the publisher sends
//! every message to every connection.

use bytes::Bytes;
use tracing::trace;

use crate::pipe::PipeSet;

/// PUB socket state (stateless beyond the connection set).
#[derive(Debug, Default)]
pub struct Pub;

impl Pub {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Broadcast `msg`. Always succeeds.
    pub fn send(&mut self, pipes: &mut PipeSet, msg: Bytes) -> usize {
        if pipes.is_empty() {
            trace!("[PUB] No subscribers, dropping {} byte message", msg.len());
        }
        for pipe in pipes.iter_mut() {
            pipe.push_dropping_oldest(msg.clone());
        }
        msg.len()
    }
}
