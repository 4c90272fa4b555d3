//! Message bus seam
//!
//! The gateway talks to the outside world over a topic-based pub/sub bus.
//! The transport itself is a collaborator, not part of the core, so it is
//! abstracted behind [`MessageBus`]; [`InProcessBus`] is the in-memory
//! implementation used by the default wiring and by tests. A broker-backed
//! implementation plugs in at the same seam.

mod memory;

pub use memory::InProcessBus;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::broadcast;

use crate::error::Result;

/// One message on the bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

/// Pub/sub transport interface
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a topic. Retained messages are replayed to late
    /// subscribers so they see current state.
    async fn publish(&self, topic: &str, payload: Value, retain: bool) -> Result<()>;

    /// Subscribe to a topic filter (`+` single level, `#` multi level).
    async fn subscribe(&self, filter: &str) -> Result<Subscription>;
}

/// Live subscription handle
pub struct Subscription {
    filter: String,
    retained: VecDeque<BusMessage>,
    receiver: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub(crate) fn new(
        filter: String,
        retained: VecDeque<BusMessage>,
        receiver: broadcast::Receiver<BusMessage>,
    ) -> Self {
        Self {
            filter,
            retained,
            receiver,
        }
    }

    /// Next matching message, retained ones first. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        if let Some(msg) = self.retained.pop_front() {
            return Some(msg);
        }

        loop {
            match self.receiver.recv().await {
                Ok(msg) if topic_matches(&self.filter, &msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        filter = %self.filter,
                        skipped = skipped,
                        "Subscription lagged, messages dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// MQTT-style topic filter matching
///
/// `+` matches exactly one level, `#` matches the remainder (including the
/// parent level itself, so `a/#` matches `a`).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("intercom/aa/message", "intercom/aa/message"));
        assert!(!topic_matches("intercom/aa/message", "intercom/bb/message"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("intercom/+/message", "intercom/aa:bb/message"));
        assert!(!topic_matches("intercom/+/message", "intercom/aa/bb/message"));
        assert!(!topic_matches("intercom/+/message", "intercom/aa/config"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("intercom/+/management/#", "intercom/aa/management/door"));
        assert!(topic_matches(
            "intercom/+/management/#",
            "intercom/aa/management/x/y"
        ));
        assert!(topic_matches("intercom/aa/#", "intercom/aa"));
        assert!(!topic_matches("intercom/+/management/#", "intercom/aa/message"));
    }

    #[test]
    fn test_length_mismatch() {
        assert!(!topic_matches("intercom/aa", "intercom/aa/message"));
        assert!(!topic_matches("intercom/aa/message", "intercom/aa"));
    }
}
