//! In-process publish/subscribe message bus.
//!
//! Stands in for a real broker (Kafka/NATS/etc.) while keeping the same
//! shape the pipeline stages are written against: named topics, a
//! partition key per message, and independent consumer groups that each
//! see every message on a topic. Ordering is preserved per key within a
//! group (messages for the same key always land on the same lane and are
//! processed in order by a single task); messages for different keys may
//! be processed concurrently.
//!
//! A handler error is logged and the lane moves on to the next message —
//! there is no infinite-retry loop here, matching the rest of the
//! pipeline's "log and continue" posture for recoverable failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Number of ordered lanes each consumer group gets per topic. Messages
/// with the same key always hash to the same lane.
const LANES_PER_GROUP: usize = 8;
const LANE_CAPACITY: usize = 1024;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, key: &str, payload: Value) -> anyhow::Result<()>;
}

struct Envelope {
    key: String,
    payload: Value,
}

struct GroupLanes {
    group: String,
    lanes: Vec<mpsc::Sender<Envelope>>,
}

/// Bus trait the pipeline is written against; an in-process implementation
/// is the only one this crate ships, but callers only depend on this
/// interface so a broker-backed implementation could drop in later.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, key: &str, payload: Value) -> anyhow::Result<()>;

    fn subscribe(&self, topic: &str, group: &str, handler: Arc<dyn Handler>);
}

pub struct InProcessBus {
    topics: Mutex<HashMap<String, Vec<GroupLanes>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn lane_index(key: &str) -> usize {
        let mut hash: u64 = 1469598103934665603; // FNV-1a offset basis
        for byte in key.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        (hash as usize) % LANES_PER_GROUP
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InProcessBus {
    fn publish(&self, topic: &str, key: &str, payload: Value) -> anyhow::Result<()> {
        let topics = self.topics.lock();
        let Some(groups) = topics.get(topic) else {
            // No consumer group has subscribed yet; this is a no-op rather
            // than an error, matching fire-and-forget pub/sub semantics.
            return Ok(());
        };

        let lane = Self::lane_index(key);
        for group in groups {
            let envelope = Envelope {
                key: key.to_string(),
                payload: payload.clone(),
            };
            if let Err(err) = group.lanes[lane].try_send(envelope) {
                warn!(
                    topic,
                    group = group.group.as_str(),
                    lane,
                    error = %err,
                    "bus lane full or closed, dropping message"
                );
            }
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, group: &str, handler: Arc<dyn Handler>) {
        let mut lanes = Vec::with_capacity(LANES_PER_GROUP);
        for lane_id in 0..LANES_PER_GROUP {
            let (tx, mut rx) = mpsc::channel::<Envelope>(LANE_CAPACITY);
            let handler = handler.clone();
            let topic_owned = topic.to_string();
            let group_owned = group.to_string();

            tokio::spawn(async move {
                while let Some(envelope) = rx.recv().await {
                    if let Err(err) = handler.handle(&envelope.key, envelope.payload).await {
                        error!(
                            topic = topic_owned.as_str(),
                            group = group_owned.as_str(),
                            lane = lane_id,
                            key = envelope.key.as_str(),
                            error = %err,
                            "bus handler failed, skipping message"
                        );
                    }
                }
            });

            lanes.push(tx);
        }

        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(GroupLanes {
                group: group.to_string(),
                lanes,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _key: &str, _payload: Value) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_a_noop() {
        let bus = InProcessBus::new();
        let result = bus.publish("normalized", "deal-1", serde_json::json!({"a": 1}));
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn subscriber_receives_published_messages() {
        let bus = InProcessBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "normalized",
            "scorer",
            Arc::new(CountingHandler {
                count: count.clone(),
            }),
        );

        for i in 0..20 {
            bus.publish(
                "normalized",
                &format!("deal-{i}"),
                serde_json::json!({"i": i}),
            )
            .unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn same_key_always_hashes_to_same_lane() {
        assert_eq!(
            InProcessBus::lane_index("deal-42"),
            InProcessBus::lane_index("deal-42")
        );
    }
}
