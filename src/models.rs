//! Canonical data model shared across the pipeline, the planner, and the API surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The two supplier categories the pipeline understands. Closed by design —
/// widening this set means touching the Normalizer, nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealType {
    Flight,
    Hotel,
}

impl DealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealType::Flight => "flight",
            DealType::Hotel => "hotel",
        }
    }
}

/// Type-specific attributes. A Deal's `metadata` is always one of these two
/// variants — never a free-form JSON blob at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DealMetadata {
    Flight {
        origin: String,
        destination: String,
        airline: String,
        departure: Option<String>,
        arrival: Option<String>,
        cabin_class: String,
        baggage_included: bool,
        flight_code: Option<String>,
        seats_left: i64,
    },
    Hotel {
        city: String,
        state: Option<String>,
        address: Option<String>,
        rating: f64,
        amenities: Vec<String>,
        rooms_left: i64,
    },
}

impl DealMetadata {
    pub fn inventory(&self) -> i64 {
        match self {
            DealMetadata::Flight { seats_left, .. } => *seats_left,
            DealMetadata::Hotel { rooms_left, .. } => *rooms_left,
        }
    }

    /// Combined amenity/feature strings used by scoring and tagging bonuses.
    /// Canonicalized to the same small vocabulary the Tagger derives tags
    /// from, so the Scorer's feature bonus and the Tagger's amenity tags
    /// never disagree about what a raw amenity string means.
    pub fn feature_strings(&self) -> Vec<String> {
        match self {
            DealMetadata::Flight {
                baggage_included,
                cabin_class,
                ..
            } => {
                let mut out = Vec::new();
                if *baggage_included {
                    out.push("baggage-included".to_string());
                }
                let cabin_lower = cabin_class.to_lowercase();
                if cabin_lower.contains("business") || cabin_lower.contains("first") {
                    out.push("premium-cabin".to_string());
                }
                out
            }
            DealMetadata::Hotel { amenities, .. } => {
                let lowered: Vec<String> = amenities.iter().map(|a| a.to_lowercase()).collect();
                let has = |needle: &str| lowered.iter().any(|a| a.contains(needle));
                let mut out = Vec::new();
                if has("non-refundable") {
                    out.push("non-refundable".to_string());
                } else if has("refundable") {
                    out.push("refundable".to_string());
                }
                if has("cancellation") {
                    out.push("free-cancellation".to_string());
                }
                if has("pet") {
                    out.push("pet-friendly".to_string());
                }
                if has("transit") {
                    out.push("near-transit".to_string());
                }
                if has("breakfast") {
                    out.push("breakfast-included".to_string());
                }
                if has("wifi") {
                    out.push("free-wifi".to_string());
                }
                if has("pool") {
                    out.push("pool".to_string());
                }
                if has("fitness") || has("gym") {
                    out.push("fitness-center".to_string());
                }
                if has("parking") {
                    out.push("parking-available".to_string());
                }
                if has("shuttle") {
                    out.push("airport-shuttle".to_string());
                }
                out
            }
        }
    }
}

/// Canonical, persisted travel offering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub deal_id: String,
    pub deal_type: DealType,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub original_price: f64,
    pub avg_30d_price: f64,
    pub discount_percent: f64,
    pub score: u32,
    pub tags: HashSet<String>,
    pub metadata: DealMetadata,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active: bool,
}

impl Deal {
    /// `discount_percent = max(0, (original_price - price) / original_price * 100)`.
    pub fn compute_discount_percent(original_price: f64, price: f64) -> f64 {
        if original_price <= 0.0 {
            return 0.0;
        }
        ((original_price - price) / original_price * 100.0).max(0.0)
    }

    /// `price <= 0.85 * avg_30d_price`, only meaningful when history exists.
    pub fn is_deal_flagged(&self) -> bool {
        self.avg_30d_price > 0.0 && self.price <= 0.85 * self.avg_30d_price
    }
}

/// User-registered price/inventory threshold on a specific deal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceWatch {
    pub watch_id: String,
    pub user_id: String,
    pub deal_id: String,
    pub price_threshold: Option<f64>,
    pub inventory_threshold: Option<i64>,
    pub active: bool,
    pub last_notified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One leg of a trip bundle plus its computed cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Itinerary {
    pub flight_deal_id: String,
    pub hotel_deal_id: String,
    pub total_cost: f64,
}

/// A persisted, ranked (flight, hotel) bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripPlan {
    pub plan_id: String,
    pub user_id: String,
    pub query_snapshot: serde_json::Value,
    pub itinerary: Itinerary,
    pub fit_score: u32,
    pub total_cost: f64,
    pub created_at: DateTime<Utc>,
}

/// Append-only conversation log entry; last K entries per user seed IntentParser context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub user_id: String,
    pub message: String,
    pub response: String,
    pub intent: String,
    pub entities: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Opportunistically updated user profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: String,
    pub budget_max: Option<f64>,
    pub frequent_routes: Vec<String>,
    pub favorite_destinations: Vec<String>,
    pub preferred_airlines: Vec<String>,
    pub direct_flights_only: bool,
    pub time_preference: Option<String>,
    pub search_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl UserPreference {
    pub const MAX_BOUNDED_LIST: usize = 10;

    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            budget_max: None,
            frequent_routes: Vec::new(),
            favorite_destinations: Vec::new(),
            preferred_airlines: Vec::new(),
            direct_flights_only: false,
            time_preference: None,
            search_count: 0,
            updated_at: Utc::now(),
        }
    }

    /// Push onto a bounded "last N" list, evicting the oldest entry first.
    pub fn push_bounded(list: &mut Vec<String>, value: String) {
        if let Some(pos) = list.iter().position(|v| v == &value) {
            list.remove(pos);
        }
        list.push(value);
        if list.len() > Self::MAX_BOUNDED_LIST {
            list.remove(0);
        }
    }
}

// --- Bus message envelopes -------------------------------------------------

/// Raw supplier row as it arrives on `raw_feeds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFeedMessage {
    pub feed_type: DealType,
    pub data: serde_json::Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Canonical record emitted by the Normalizer onto `normalized`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDeal {
    pub deal_id: String,
    pub deal_type: DealType,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub original_price: f64,
    pub metadata: DealMetadata,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Record emitted by the Scorer onto `scored`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDeal {
    pub normalized: NormalizedDeal,
    pub avg_30d_price: f64,
    pub discount_percent: f64,
    pub score: u32,
    pub deal_flagged: bool,
}

/// Record emitted by the Tagger onto `tagged`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedDeal {
    pub scored: ScoredDeal,
    pub tags: HashSet<String>,
}

/// Event published onto `events` after a successful Persister transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DealEvent {
    NewDeal {
        deal_id: String,
        data: Deal,
    },
    PriceUpdate {
        deal_id: String,
        old_price: f64,
        new_price: f64,
        data: Deal,
    },
}

impl DealEvent {
    pub fn deal_id(&self) -> &str {
        match self {
            DealEvent::NewDeal { deal_id, .. } => deal_id,
            DealEvent::PriceUpdate { deal_id, .. } => deal_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_percent_never_negative() {
        assert_eq!(Deal::compute_discount_percent(100.0, 120.0), 0.0);
        assert_eq!(Deal::compute_discount_percent(100.0, 80.0), 20.0);
        assert_eq!(Deal::compute_discount_percent(0.0, 80.0), 0.0);
    }

    #[test]
    fn bounded_list_evicts_oldest() {
        let mut list = Vec::new();
        for i in 0..12 {
            UserPreference::push_bounded(&mut list, format!("route-{i}"));
        }
        assert_eq!(list.len(), UserPreference::MAX_BOUNDED_LIST);
        assert_eq!(list.first().unwrap(), "route-2");
        assert_eq!(list.last().unwrap(), "route-11");
    }
}
