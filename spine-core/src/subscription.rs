//! Topic filters for SUB sockets.
//!
//! A message is delivered when at least one registered filter is a prefix of
//! it. The empty filter matches everything. With no filters registered,
//! nothing is delivered.

use bytes::Bytes;
use smallvec::SmallVec;

/// A single topic prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    prefix: Bytes,
}

impl TopicFilter {
    #[must_use]
    pub const fn new(prefix: Bytes) -> Self {
        Self { prefix }
    }

    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Check if this filter matches a message.
    #[must_use]
    pub fn matches(&self, msg: &[u8]) -> bool {
        msg.starts_with(&self.prefix)
    }
}

/// Set of filters registered on one SUB socket.
///
/// Most subscribers hold a handful of topics, so the filters live inline.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    filters: SmallVec<[TopicFilter; 4]>,
}

impl SubscriptionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prefix. Returns `false` if it was already present.
    pub fn subscribe(&mut self, prefix: Bytes) -> bool {
        if self.filters.iter().any(|f| f.prefix == prefix) {
            return false;
        }
        self.filters.push(TopicFilter::new(prefix));
        true
    }

    /// Remove a prefix. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, prefix: &[u8]) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| f.prefix() != prefix);
        self.filters.len() != before
    }

    /// Check if a message should be delivered.
    #[must_use]
    pub fn matches(&self, msg: &[u8]) -> bool {
        self.filters.iter().any(|f| f.matches(msg))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicFilter> {
        self.filters.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_prefix() {
        let filter = TopicFilter::new(Bytes::from_static(b"A"));
        assert!(filter.matches(b"ABC"));
        assert!(filter.matches(b"A"));
        assert!(!filter.matches(b"BAC"));
        assert!(!filter.matches(b""));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let filter = TopicFilter::new(Bytes::new());
        assert!(filter.matches(b"anything"));
        assert!(filter.matches(b""));
    }

    #[test]
    fn test_no_filters_matches_nothing() {
        let set = SubscriptionSet::new();
        assert!(!set.matches(b"ABC"));
        assert!(!set.matches(b""));
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut set = SubscriptionSet::new();
        assert!(set.subscribe(Bytes::from_static(b"weather.")));
        assert!(!set.subscribe(Bytes::from_static(b"weather.")));
        assert!(set.subscribe(Bytes::from_static(b"news.")));
        assert_eq!(set.len(), 2);

        assert!(set.matches(b"weather.oslo"));
        assert!(set.matches(b"news.today"));
        assert!(!set.matches(b"sports"));

        assert!(set.unsubscribe(b"weather."));
        assert!(!set.unsubscribe(b"weather."));
        assert!(!set.matches(b"weather.oslo"));
        assert!(set.matches(b"news.today"));
    }
}
