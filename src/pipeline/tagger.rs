//! Stage 3: derives a tag set from the scored deal. Tags drive both the
//! API's filterable facets and the HotDealMonitor's savings/discount scan.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::bus::{Handler, MessageBus};
use crate::models::{DealMetadata, DealType, ScoredDeal, TaggedDeal};

use super::TOPIC_TAGGED;

pub struct Tagger {
    bus: Arc<dyn MessageBus>,
}

impl Tagger {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    pub fn tag(scored: &ScoredDeal) -> HashSet<String> {
        let mut tags = HashSet::new();

        if scored.discount_percent >= 30.0 {
            tags.insert("hot-deal".to_string());
        } else if scored.discount_percent >= 20.0 {
            tags.insert("great-value".to_string());
        } else if scored.discount_percent >= 15.0 {
            tags.insert("good-deal".to_string());
        }

        let inventory = scored.normalized.metadata.inventory();
        if inventory <= 3 {
            tags.insert("almost-sold-out".to_string());
        } else if inventory <= 10 {
            tags.insert("limited-availability".to_string());
        }

        match &scored.normalized.metadata {
            DealMetadata::Flight {
                baggage_included,
                cabin_class,
                ..
            } => {
                if *baggage_included {
                    tags.insert("baggage-included".to_string());
                }
                let cabin = cabin_class.to_lowercase();
                if cabin.contains("business") || cabin.contains("first") {
                    tags.insert("premium-cabin".to_string());
                }
            }
            DealMetadata::Hotel { rating, .. } => {
                if *rating >= 4.5 {
                    tags.insert("luxury".to_string());
                } else if *rating >= 4.0 {
                    tags.insert("upscale".to_string());
                } else if *rating >= 3.0 {
                    tags.insert("comfort".to_string());
                }

                let features = scored.normalized.metadata.feature_strings();
                if !features.contains(&"refundable".to_string()) && !features.contains(&"non-refundable".to_string()) {
                    tags.insert("non-refundable".to_string());
                }
                for feature in features {
                    tags.insert(feature);
                }
            }
        }

        if scored.normalized.deal_type == DealType::Flight {
            tags.insert("flight".to_string());
        } else {
            tags.insert("hotel".to_string());
        }

        tags
    }
}

#[async_trait]
impl Handler for Tagger {
    async fn handle(&self, _key: &str, payload: Value) -> anyhow::Result<()> {
        let scored: ScoredDeal = serde_json::from_value(payload)?;
        let tags = Self::tag(&scored);
        let deal_id = scored.normalized.deal_id.clone();
        let tagged = TaggedDeal { scored, tags };

        let payload = serde_json::to_value(&tagged)?;
        self.bus.publish(TOPIC_TAGGED, &deal_id, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NormalizedDeal;

    fn sample(discount_percent: f64, deal_flagged: bool, score: u32) -> ScoredDeal {
        ScoredDeal {
            normalized: NormalizedDeal {
                deal_id: "deal-1".to_string(),
                deal_type: DealType::Flight,
                title: "t".to_string(),
                description: "d".to_string(),
                price: 300.0,
                original_price: 600.0,
                metadata: DealMetadata::Flight {
                    origin: "JFK".to_string(),
                    destination: "LHR".to_string(),
                    airline: "Delta".to_string(),
                    departure: None,
                    arrival: None,
                    cabin_class: "business".to_string(),
                    baggage_included: true,
                    flight_code: None,
                    seats_left: 2,
                },
                expires_at: None,
            },
            avg_30d_price: 500.0,
            discount_percent,
            score,
            deal_flagged,
        }
    }

    #[test]
    fn steep_discount_and_premium_and_scarce_inventory_are_all_tagged() {
        let tags = Tagger::tag(&sample(60.0, true, 95));
        assert!(tags.contains("hot-deal"));
        assert!(tags.contains("premium-cabin"));
        assert!(tags.contains("almost-sold-out"));
        assert!(tags.contains("baggage-included"));
    }

    #[test]
    fn modest_discount_gets_good_deal_not_hot_deal() {
        let tags = Tagger::tag(&sample(17.0, false, 40));
        assert!(tags.contains("good-deal"));
        assert!(!tags.contains("hot-deal"));
    }

    #[test]
    fn hotel_amenities_map_to_canonical_tags() {
        let mut scored = sample(25.0, false, 70);
        scored.normalized.deal_type = DealType::Hotel;
        scored.normalized.metadata = DealMetadata::Hotel {
            city: "LONDON".to_string(),
            state: None,
            address: None,
            rating: 4.6,
            amenities: vec!["Free Wifi".to_string(), "Airport Shuttle".to_string(), "Refundable".to_string()],
            rooms_left: 20,
        };
        let tags = Tagger::tag(&scored);
        assert!(tags.contains("luxury"));
        assert!(tags.contains("free-wifi"));
        assert!(tags.contains("airport-shuttle"));
        assert!(tags.contains("refundable"));
        assert!(!tags.contains("non-refundable"));
    }
}
