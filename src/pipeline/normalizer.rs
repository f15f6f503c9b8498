//! Stage 1: turns a supplier-shaped [`RawFeedMessage`] into a canonical
//! [`NormalizedDeal`], generating a stable `deal_id` from the supplier's own
//! primary key so repeated ingestion of the same listing converges on the
//! same row.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::bus::{Handler, MessageBus};
use crate::models::{DealMetadata, DealType, NormalizedDeal, RawFeedMessage};

use super::TOPIC_NORMALIZED;

pub struct Normalizer {
    bus: Arc<dyn MessageBus>,
}

impl Normalizer {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// `deal_id = "flight_" + primary key` / `"hotel_" + primary key`. The
    /// primary key is the supplier's own `id`, falling back to
    /// `route_id`/`flight_code` (flights) or `hotel_id`/`listing_id`
    /// (hotels) for feeds that don't send `id` directly.
    fn deal_id(feed_type: DealType, data: &Value) -> String {
        let prefix = match feed_type {
            DealType::Flight => "flight_",
            DealType::Hotel => "hotel_",
        };
        let fallback_keys: &[&str] = match feed_type {
            DealType::Flight => &["route_id", "flight_code"],
            DealType::Hotel => &["hotel_id", "listing_id"],
        };
        let primary_key = data
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| {
                fallback_keys
                    .iter()
                    .find_map(|key| data.get(key).and_then(Value::as_str))
            })
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        format!("{prefix}{primary_key}")
    }

    /// Accepts a free-form amenities value: a JSON list of strings, or a
    /// single comma-separated string as some supplier feeds send it.
    fn amenities(data: &Value) -> Vec<String> {
        match data.get("amenities") {
            Some(Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(raw)) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn normalize(&self, msg: RawFeedMessage) -> anyhow::Result<NormalizedDeal> {
        let deal_id = Self::deal_id(msg.feed_type, &msg.data);
        let price = msg
            .data
            .get("price")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow::anyhow!("raw feed message missing price"))?;
        if price <= 0.0 {
            anyhow::bail!("raw feed message has non-positive price {price}");
        }
        let original_price = msg
            .data
            .get("original_price")
            .or_else(|| msg.data.get("base_price"))
            .and_then(Value::as_f64)
            .unwrap_or(price);

        let (title, description, metadata) = match msg.feed_type {
            DealType::Flight => {
                let origin = field_str(&msg.data, "origin")?;
                let destination = field_str(&msg.data, "destination")?;
                let airline = msg
                    .data
                    .get("airline")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown Airline")
                    .to_string();
                let metadata = DealMetadata::Flight {
                    origin: origin.clone(),
                    destination: destination.clone(),
                    airline: airline.clone(),
                    departure: msg.data.get("departure").and_then(Value::as_str).map(String::from),
                    arrival: msg.data.get("arrival").and_then(Value::as_str).map(String::from),
                    cabin_class: msg
                        .data
                        .get("cabin_class")
                        .and_then(Value::as_str)
                        .unwrap_or("economy")
                        .to_string(),
                    baggage_included: msg
                        .data
                        .get("baggage_included")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    flight_code: msg.data.get("flight_code").and_then(Value::as_str).map(String::from),
                    seats_left: msg.data.get("seats_left").and_then(Value::as_i64).unwrap_or(0),
                };
                (
                    format!("{origin} to {destination} - {airline}"),
                    format!("Flight from {origin} to {destination} on {airline}"),
                    metadata,
                )
            }
            DealType::Hotel => {
                let city = field_str(&msg.data, "city")?;
                let name = msg
                    .data
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("Hotel")
                    .to_string();
                let metadata = DealMetadata::Hotel {
                    city: city.clone(),
                    state: msg.data.get("state").and_then(Value::as_str).map(String::from),
                    address: msg.data.get("address").and_then(Value::as_str).map(String::from),
                    rating: msg.data.get("rating").and_then(Value::as_f64).unwrap_or(0.0),
                    amenities: Self::amenities(&msg.data),
                    rooms_left: msg.data.get("rooms_left").and_then(Value::as_i64).unwrap_or(0),
                };
                (name.clone(), format!("{name} in {city}"), metadata)
            }
        };

        let expires_at = msg
            .data
            .get("expires_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc));

        Ok(NormalizedDeal {
            deal_id,
            deal_type: msg.feed_type,
            title,
            description,
            price,
            original_price,
            metadata,
            expires_at,
        })
    }
}

fn field_str(data: &Value, key: &str) -> anyhow::Result<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(|s| s.to_uppercase())
        .ok_or_else(|| anyhow::anyhow!("raw feed message missing required field `{key}`"))
}

#[async_trait]
impl Handler for Normalizer {
    async fn handle(&self, key: &str, payload: Value) -> anyhow::Result<()> {
        let raw: RawFeedMessage = serde_json::from_value(payload)?;
        match self.normalize(raw) {
            Ok(normalized) => {
                let payload = serde_json::to_value(&normalized)?;
                self.bus.publish(TOPIC_NORMALIZED, &normalized.deal_id, payload)?;
            }
            Err(err) => warn!(key, error = %err, "dropping unnormalizable raw feed message"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;

    fn raw_flight() -> RawFeedMessage {
        RawFeedMessage {
            feed_type: DealType::Flight,
            data: serde_json::json!({
                "id": "F1",
                "origin": "jfk",
                "destination": "lhr",
                "airline": "Delta",
                "price": 450.0,
                "original_price": 600.0,
                "flight_code": "DL123",
                "seats_left": 3,
            }),
            source: "demo-supplier".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn deal_id_is_prefixed_supplier_primary_key() {
        let normalizer = Normalizer::new(Arc::new(InProcessBus::new()));
        let normalized = normalizer.normalize(raw_flight()).unwrap();
        assert_eq!(normalized.deal_id, "flight_F1");
    }

    #[test]
    fn normalizes_flight_fields_to_uppercase() {
        let normalizer = Normalizer::new(Arc::new(InProcessBus::new()));
        let normalized = normalizer.normalize(raw_flight()).unwrap();
        match normalized.metadata {
            DealMetadata::Flight { origin, destination, .. } => {
                assert_eq!(origin, "JFK");
                assert_eq!(destination, "LHR");
            }
            _ => panic!("expected flight metadata"),
        }
    }

    #[test]
    fn same_natural_key_yields_same_deal_id() {
        let normalizer = Normalizer::new(Arc::new(InProcessBus::new()));
        let a = normalizer.normalize(raw_flight()).unwrap();
        let b = normalizer.normalize(raw_flight()).unwrap();
        assert_eq!(a.deal_id, b.deal_id);
    }

    #[test]
    fn missing_price_is_rejected() {
        let normalizer = Normalizer::new(Arc::new(InProcessBus::new()));
        let mut raw = raw_flight();
        raw.data.as_object_mut().unwrap().remove("price");
        assert!(normalizer.normalize(raw).is_err());
    }

    #[test]
    fn flight_title_follows_route_dash_airline_form() {
        let normalizer = Normalizer::new(Arc::new(InProcessBus::new()));
        let normalized = normalizer.normalize(raw_flight()).unwrap();
        assert_eq!(normalized.title, "JFK to LHR - Delta");
    }

    #[test]
    fn base_price_stands_in_for_a_missing_original_price() {
        let normalizer = Normalizer::new(Arc::new(InProcessBus::new()));
        let mut raw = raw_flight();
        let data = raw.data.as_object_mut().unwrap();
        data.remove("original_price");
        data.insert("base_price".to_string(), serde_json::json!(250.0));
        data.insert("price".to_string(), serde_json::json!(200.0));
        let normalized = normalizer.normalize(raw).unwrap();
        assert_eq!(normalized.original_price, 250.0);
    }

    #[test]
    fn comma_separated_amenities_string_is_split() {
        let normalizer = Normalizer::new(Arc::new(InProcessBus::new()));
        let raw = RawFeedMessage {
            feed_type: DealType::Hotel,
            data: serde_json::json!({
                "id": "H1",
                "city": "london",
                "name": "Savoy Court",
                "price": 180.0,
                "rating": 4.4,
                "amenities": "Free Wifi, Breakfast Included , Pool",
                "rooms_left": 4,
            }),
            source: "demo-supplier".to_string(),
            timestamp: Utc::now(),
        };
        let normalized = normalizer.normalize(raw).unwrap();
        assert_eq!(normalized.title, "Savoy Court");
        match normalized.metadata {
            DealMetadata::Hotel { amenities, .. } => {
                assert_eq!(amenities, vec!["Free Wifi", "Breakfast Included", "Pool"]);
            }
            _ => panic!("expected hotel metadata"),
        }
    }
}
