//! Feed ingestion. Real supplier integration (SQL warehouses, partner
//! APIs) is out of scope; [`ListingsSource`] is the seam a real loader
//! would implement, and [`SeedListingsSource`] is a small synthetic
//! generator that exercises the rest of the pipeline end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::bus::MessageBus;
use crate::models::{DealType, RawFeedMessage};
use crate::pipeline::TOPIC_RAW_FEEDS;

const BACKOFF_AFTER_FAILURE: std::time::Duration = std::time::Duration::from_secs(10);

/// A source of raw listings. A production deployment would implement this
/// against a supplier feed or warehouse query; this crate ships only the
/// synthetic seed source below.
#[async_trait]
pub trait ListingsSource: Send + Sync {
    async fn poll(&self) -> anyhow::Result<Vec<RawFeedMessage>>;
}

/// Generates a small, deterministic-ish rotation of flight and hotel
/// listings with jittered prices, so the pipeline has continuous traffic
/// without a live supplier connection.
pub struct SeedListingsSource {
    tick: AtomicU64,
}

impl SeedListingsSource {
    pub fn new() -> Self {
        Self {
            tick: AtomicU64::new(0),
        }
    }

    fn routes() -> &'static [(&'static str, &'static str, &'static str)] {
        &[
            ("JFK", "LHR", "Delta"),
            ("SFO", "NRT", "United"),
            ("ORD", "CDG", "American"),
            ("LAX", "DXB", "Emirates"),
            ("JFK", "DXB", "Emirates"),
        ]
    }

    fn cities() -> &'static [&'static str] {
        &["NEW YORK", "LONDON", "PARIS", "TOKYO", "DUBAI"]
    }
}

impl Default for SeedListingsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingsSource for SeedListingsSource {
    async fn poll(&self) -> anyhow::Result<Vec<RawFeedMessage>> {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst);
        let mut out = Vec::new();

        let routes = Self::routes();
        let (origin, destination, airline) = routes[(tick as usize) % routes.len()];
        let base_price = 400.0 + ((tick % 7) as f64) * 35.0;
        let jitter = ((tick % 11) as f64) * 4.0;
        let flight_code = format!("{airline}{:03}", tick % 900);
        out.push(RawFeedMessage {
            feed_type: DealType::Flight,
            data: serde_json::json!({
                "id": flight_code.clone(),
                "origin": origin,
                "destination": destination,
                "airline": airline,
                "price": (base_price - jitter).max(80.0),
                "original_price": base_price + 120.0,
                "cabin_class": if tick % 9 == 0 { "business" } else { "economy" },
                "baggage_included": tick % 3 == 0,
                "flight_code": flight_code,
                "seats_left": 1 + (tick % 12) as i64,
            }),
            source: "seed-feed".to_string(),
            timestamp: Utc::now(),
        });

        let cities = Self::cities();
        let city = cities[(tick as usize) % cities.len()];
        let base_rate = 150.0 + ((tick % 5) as f64) * 40.0;
        let listing_id = format!("seed-hotel-{}", tick % 50);
        out.push(RawFeedMessage {
            feed_type: DealType::Hotel,
            data: serde_json::json!({
                "id": listing_id.clone(),
                "city": city,
                "name": format!("{city} Central Hotel"),
                "price": (base_rate - jitter).max(50.0),
                "original_price": base_rate + 60.0,
                "rating": 3.5 + ((tick % 4) as f64) * 0.4,
                "amenities": ["wifi", "breakfast"],
                "rooms_left": 1 + (tick % 8) as i64,
                "listing_id": listing_id,
            }),
            source: "seed-feed".to_string(),
            timestamp: Utc::now(),
        });

        Ok(out)
    }
}

pub struct FeedIngester {
    bus: Arc<dyn MessageBus>,
    source: Arc<dyn ListingsSource>,
}

impl FeedIngester {
    pub fn new(bus: Arc<dyn MessageBus>, source: Arc<dyn ListingsSource>) -> Self {
        Self { bus, source }
    }

    pub async fn tick(&self) -> anyhow::Result<usize> {
        let messages = self.source.poll().await?;
        let count = messages.len();
        for msg in messages {
            let key = format!("{}:{}", msg.source, msg.timestamp.timestamp_nanos_opt().unwrap_or(0));
            let payload = serde_json::to_value(&msg)?;
            self.bus.publish(TOPIC_RAW_FEEDS, &key, payload)?;
        }
        Ok(count)
    }

    pub async fn run(self: Arc<Self>, interval: std::time::Duration, cancel: crate::shutdown::ShutdownToken) {
        let mut ticker = tokio::time::interval(interval);
        'outer: loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(count) => info!(count, "feed ingestion tick"),
                        Err(err) => {
                            warn!(error = %err, "feed ingestion tick failed, backing off");
                            tokio::select! {
                                _ = tokio::time::sleep(BACKOFF_AFTER_FAILURE) => {}
                                _ = cancel.cancelled() => break 'outer,
                            }
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!("feed ingester shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;

    #[tokio::test]
    async fn seed_source_produces_both_deal_types() {
        let source = SeedListingsSource::new();
        let batch = source.poll().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().any(|m| m.feed_type == DealType::Flight));
        assert!(batch.iter().any(|m| m.feed_type == DealType::Hotel));
    }

    #[tokio::test]
    async fn ingester_publishes_every_polled_message() {
        let bus = Arc::new(InProcessBus::new());
        let ingester = FeedIngester::new(bus, Arc::new(SeedListingsSource::new()));
        let count = ingester.tick().await.unwrap();
        assert_eq!(count, 2);
    }
}
