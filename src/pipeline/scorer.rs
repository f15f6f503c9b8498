//! Stage 2: attaches the rolling 30-day average price, discount percent,
//! the deal-flag verdict, and a 0-100 desirability score.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::bus::{Handler, MessageBus};
use crate::models::{Deal, DealMetadata, NormalizedDeal, ScoredDeal};
use crate::store::Store;

use super::TOPIC_SCORED;

/// Feature strings that earn the amenity/feature bonus; anything outside
/// this set (e.g. `baggage-included`) still drives the Tagger but doesn't
/// contribute to the score.
const BONUS_FEATURES: &[&str] = &[
    "refundable",
    "free-cancellation",
    "pet-friendly",
    "near-transit",
    "breakfast-included",
    "free-wifi",
    "airport-shuttle",
    "non-stop",
];

pub struct Scorer {
    bus: Arc<dyn MessageBus>,
    store: Arc<Store>,
    min_score: u32,
}

impl Scorer {
    pub fn new(bus: Arc<dyn MessageBus>, store: Arc<Store>, min_score: u32) -> Self {
        Self {
            bus,
            store,
            min_score,
        }
    }

    fn price_vs_list(discount_percent: f64) -> f64 {
        if discount_percent >= 30.0 {
            40.0
        } else if discount_percent >= 20.0 {
            30.0
        } else if discount_percent >= 15.0 {
            20.0
        } else if discount_percent >= 10.0 {
            10.0
        } else {
            0.0
        }
    }

    fn inventory_scarcity(inventory: i64) -> f64 {
        if inventory <= 3 {
            25.0
        } else if inventory <= 5 {
            20.0
        } else if inventory <= 10 {
            15.0
        } else if inventory <= 20 {
            10.0
        } else {
            0.0
        }
    }

    fn time_urgency(normalized: &NormalizedDeal) -> f64 {
        let Some(expires_at) = normalized.expires_at else {
            return 0.0;
        };
        let hours = (expires_at - Utc::now()).num_hours();
        if hours <= 24 {
            20.0
        } else if hours <= 48 {
            15.0
        } else if hours <= 72 {
            10.0
        } else {
            0.0
        }
    }

    fn feature_bonus(normalized: &NormalizedDeal) -> f64 {
        let matches = normalized
            .metadata
            .feature_strings()
            .iter()
            .filter(|f| BONUS_FEATURES.contains(&f.as_str()))
            .count() as f64;
        (matches * 3.0).min(15.0)
    }

    fn value_and_rating_bonus(normalized: &NormalizedDeal) -> f64 {
        match &normalized.metadata {
            DealMetadata::Flight { .. } => {
                if normalized.price < 200.0 {
                    20.0
                } else if normalized.price < 350.0 {
                    15.0
                } else if normalized.price < 500.0 {
                    10.0
                } else if normalized.price < 700.0 {
                    5.0
                } else {
                    0.0
                }
            }
            DealMetadata::Hotel { rating, .. } => {
                let value = if normalized.price < 100.0 {
                    20.0
                } else if normalized.price < 150.0 {
                    15.0
                } else if normalized.price < 200.0 {
                    10.0
                } else if normalized.price < 300.0 {
                    5.0
                } else {
                    0.0
                };
                let rating_bonus = if *rating >= 4.5 {
                    10.0
                } else if *rating >= 4.0 {
                    7.0
                } else if *rating >= 3.5 {
                    5.0
                } else {
                    0.0
                };
                value + rating_bonus
            }
        }
    }

    /// Clamped sum of the five weighted factors in order: price-vs-list
    /// (<=40), inventory scarcity (<=25), time urgency (<=20), feature
    /// bonus (<=15), and a type-specific absolute value/rating bonus
    /// (<=20 flights, <=30 hotels with rating).
    pub fn score(normalized: &NormalizedDeal, discount_percent: f64, _deal_flagged: bool) -> u32 {
        let score = Self::price_vs_list(discount_percent)
            + Self::inventory_scarcity(normalized.metadata.inventory())
            + Self::time_urgency(normalized)
            + Self::feature_bonus(normalized)
            + Self::value_and_rating_bonus(normalized);

        score.clamp(0.0, 100.0).round() as u32
    }

    pub fn score_deal(&self, normalized: NormalizedDeal) -> anyhow::Result<ScoredDeal> {
        let raw_avg = self.store.avg_30d_price(&normalized.deal_id)?;
        // No history yet (first observation of this deal_id) falls back to
        // the record's own price rather than treating the average as zero.
        let avg_30d_price = if raw_avg > 0.0 { raw_avg } else { normalized.price };
        let discount_percent = Deal::compute_discount_percent(normalized.original_price, normalized.price);
        let deal_flagged = avg_30d_price > 0.0 && normalized.price <= 0.85 * avg_30d_price;
        let score = Self::score(&normalized, discount_percent, deal_flagged);

        Ok(ScoredDeal {
            normalized,
            avg_30d_price,
            discount_percent,
            score,
            deal_flagged,
        })
    }
}

#[async_trait]
impl Handler for Scorer {
    async fn handle(&self, _key: &str, payload: Value) -> anyhow::Result<()> {
        let normalized: NormalizedDeal = serde_json::from_value(payload)?;
        let scored = self.score_deal(normalized)?;

        if scored.score < self.min_score {
            return Ok(());
        }

        let deal_id = scored.normalized.deal_id.clone();
        let payload = serde_json::to_value(&scored)?;
        self.bus.publish(TOPIC_SCORED, &deal_id, payload)?;
        Ok(())
    }
}
