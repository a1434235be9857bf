//! SUB pattern: receive published messages matching a topic filter.
//!
//! Filters are byte prefixes. A message is kept if any filter is a prefix of
//! it; with no filters nothing is kept. Filtering happens as messages
//! arrive, so the inbound queues only ever hold deliverable messages and the
//! receive readiness never fires for a message `recv` would discard.
//! Unsubscribing purges queued messages that no longer match.

use bytes::Bytes;
use spine_core::error::{Result, SpineError};
use spine_core::subscription::SubscriptionSet;
use tracing::debug;

use crate::pipe::PipeSet;

/// SUB socket state.
#[derive(Debug, Default)]
pub struct Sub {
    subscriptions: SubscriptionSet,
}

impl Sub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: Bytes) {
        debug!("[SUB] Subscribe {:?}", String::from_utf8_lossy(&topic));
        self.subscriptions.subscribe(topic);
    }

    /// Remove a filter and drop queued messages that no longer match.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `topic` was never subscribed.
    pub fn unsubscribe(&mut self, topic: &[u8], pipes: &mut PipeSet) -> Result<()> {
        if !self.subscriptions.unsubscribe(topic) {
            return Err(SpineError::invalid(format!(
                "not subscribed to {:?}",
                String::from_utf8_lossy(topic)
            )));
        }
        debug!("[SUB] Unsubscribe {:?}", String::from_utf8_lossy(topic));
        let subscriptions = &self.subscriptions;
        for pipe in pipes.iter_mut() {
            pipe.retain_inbound(|msg| subscriptions.matches(msg));
        }
        pipes.retain_leftovers(|msg| subscriptions.matches(msg));
        Ok(())
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    #[must_use]
    pub fn accept_inbound(&self, msg: &Bytes) -> bool {
        self.subscriptions.matches(msg)
    }

    pub fn try_recv(&mut self, pipes: &mut PipeSet) -> Result<Bytes> {
        pipes.next_message().ok_or(SpineError::WouldBlock)
    }
}
