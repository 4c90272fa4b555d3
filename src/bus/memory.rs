//! In-process bus implementation
//!
//! Broadcast-channel fan-out with a retained-message store. Single process
//! only; good enough for the default wiring and for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{broadcast, RwLock};

use super::{topic_matches, BusMessage, MessageBus, Subscription};
use crate::error::Result;

const CHANNEL_CAPACITY: usize = 256;

/// In-memory pub/sub broker
pub struct InProcessBus {
    sender: broadcast::Sender<BusMessage>,
    /// Last retained payload per topic, replayed to new subscribers
    retained: RwLock<HashMap<String, Value>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            retained: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, payload: Value, retain: bool) -> Result<()> {
        if retain {
            let mut retained = self.retained.write().await;
            retained.insert(topic.to_string(), payload.clone());
        }

        // A send error only means nobody is subscribed right now
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });

        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription> {
        let receiver = self.sender.subscribe();

        let retained = self.retained.read().await;
        let mut replay: Vec<(&String, &Value)> = retained
            .iter()
            .filter(|(topic, _)| topic_matches(filter, topic))
            .collect();
        replay.sort_by_key(|(topic, _)| topic.clone());

        let backlog: VecDeque<BusMessage> = replay
            .into_iter()
            .map(|(topic, payload)| BusMessage {
                topic: topic.clone(),
                payload: payload.clone(),
            })
            .collect();

        Ok(Subscription::new(filter.to_string(), backlog, receiver))
    }
}
