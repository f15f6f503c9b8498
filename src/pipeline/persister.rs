//! Stage 4: commits the tagged deal to the store inside a single
//! transaction and, only once that transaction has committed, publishes
//! the resulting [`DealEvent`] and hands new-deal alerts to whatever is
//! listening for live updates.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::bus::{Handler, MessageBus};
use crate::models::{Deal, DealEvent, TaggedDeal};
use crate::store::Store;

use super::TOPIC_EVENTS;

/// Implemented by anything that wants to react to a freshly-committed new
/// deal without coupling the pipeline to the session/websocket layer.
pub trait DealEventSink: Send + Sync {
    fn on_new_deal(&self, deal: &Deal);
}

pub struct Persister {
    bus: Arc<dyn MessageBus>,
    store: Arc<Store>,
    sink: Option<Arc<dyn DealEventSink>>,
}

impl Persister {
    pub fn new(bus: Arc<dyn MessageBus>, store: Arc<Store>) -> Self {
        Self {
            bus,
            store,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DealEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn to_deal(tagged: TaggedDeal) -> Deal {
        let now = Utc::now();
        Deal {
            deal_id: tagged.scored.normalized.deal_id,
            deal_type: tagged.scored.normalized.deal_type,
            title: tagged.scored.normalized.title,
            description: tagged.scored.normalized.description,
            price: tagged.scored.normalized.price,
            original_price: tagged.scored.normalized.original_price,
            avg_30d_price: tagged.scored.avg_30d_price,
            discount_percent: tagged.scored.discount_percent,
            score: tagged.scored.score,
            tags: tagged.tags,
            metadata: tagged.scored.normalized.metadata,
            expires_at: tagged.scored.normalized.expires_at,
            created_at: now,
            updated_at: now,
            active: true,
        }
    }
}

#[async_trait]
impl Handler for Persister {
    async fn handle(&self, _key: &str, payload: Value) -> anyhow::Result<()> {
        let tagged: TaggedDeal = serde_json::from_value(payload)?;
        let deal = Self::to_deal(tagged);
        let deal_id = deal.deal_id.clone();

        let event = self.store.persist_deal(&deal)?;

        if let Some(event) = event {
            if let (DealEvent::NewDeal { data, .. }, Some(sink)) = (&event, &self.sink) {
                sink.on_new_deal(data);
            }
            let payload = serde_json::to_value(&event)?;
            self.bus.publish(TOPIC_EVENTS, &deal_id, payload)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::models::{DealMetadata, DealType, NormalizedDeal, ScoredDeal};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    impl DealEventSink for CountingSink {
        fn on_new_deal(&self, _deal: &Deal) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_tagged() -> TaggedDeal {
        TaggedDeal {
            scored: ScoredDeal {
                normalized: NormalizedDeal {
                    deal_id: "deal-1".to_string(),
                    deal_type: DealType::Flight,
                    title: "t".to_string(),
                    description: "d".to_string(),
                    price: 300.0,
                    original_price: 500.0,
                    metadata: DealMetadata::Flight {
                        origin: "JFK".to_string(),
                        destination: "LHR".to_string(),
                        airline: "Delta".to_string(),
                        departure: None,
                        arrival: None,
                        cabin_class: "economy".to_string(),
                        baggage_included: false,
                        flight_code: None,
                        seats_left: 10,
                    },
                    expires_at: None,
                },
                avg_30d_price: 450.0,
                discount_percent: 40.0,
                score: 70,
                deal_flagged: true,
            },
            tags: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn new_deal_notifies_sink_and_publishes_event() {
        let bus = Arc::new(InProcessBus::new());
        let store = Arc::new(Store::in_memory().unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CountingSink {
            count: count.clone(),
        });
        let persister = Persister::new(bus, store).with_sink(sink);

        let payload = serde_json::to_value(sample_tagged()).unwrap();
        persister.handle("deal-1", payload).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unchanged_price_does_not_renotify() {
        let bus = Arc::new(InProcessBus::new());
        let store = Arc::new(Store::in_memory().unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(CountingSink {
            count: count.clone(),
        });
        let persister = Persister::new(bus, store).with_sink(sink);

        let payload = serde_json::to_value(sample_tagged()).unwrap();
        persister.handle("deal-1", payload.clone()).await.unwrap();
        persister.handle("deal-1", payload).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
