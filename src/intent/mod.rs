//! Natural-language intent parsing: a text-model-backed primary path with
//! a deterministic regex fallback when the model is disabled, unreachable,
//! or returns something unparseable.

pub mod fallback;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::aliases;
use crate::cache::Cache;
use crate::config::Config;
use crate::models::Conversation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Search,
    SearchFlights,
    SearchHotels,
    PlanTrip,
    FindDeals,
    TrackPrice,
    RefineSearch,
    AskPolicy,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Search => "search",
            Intent::SearchFlights => "search_flights",
            Intent::SearchHotels => "search_hotels",
            Intent::PlanTrip => "plan_trip",
            Intent::FindDeals => "find_deals",
            Intent::TrackPrice => "track_price",
            Intent::RefineSearch => "refine_search",
            Intent::AskPolicy => "ask_policy",
            Intent::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "search" => Intent::Search,
            "search_flights" => Intent::SearchFlights,
            "search_hotels" => Intent::SearchHotels,
            "plan_trip" => Intent::PlanTrip,
            "find_deals" => Intent::FindDeals,
            "track" | "track_price" => Intent::TrackPrice,
            "refine" | "refine_search" => Intent::RefineSearch,
            "question" | "ask_policy" => Intent::AskPolicy,
            _ => Intent::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub intent: Intent,
    pub entities: Value,
    pub confidence: f64,
}

/// Swappable text-model backend. Production default is an HTTP call to a
/// local model server; tests substitute a canned implementation.
#[async_trait]
pub trait TextModelClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

pub struct HttpTextModelClient {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
}

impl HttpTextModelClient {
    pub fn new(endpoint: String, model_name: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            endpoint,
            model_name,
        }
    }
}

#[async_trait]
impl TextModelClient for HttpTextModelClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.model_name,
                "prompt": prompt,
                "stream": false,
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        body.get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("text model response missing `response` field"))
    }
}

pub struct IntentParser {
    model: Option<Arc<dyn TextModelClient>>,
}

impl IntentParser {
    pub fn new(model: Option<Arc<dyn TextModelClient>>) -> Self {
        Self { model }
    }

    pub fn from_config(config: &Config) -> Self {
        let model: Option<Arc<dyn TextModelClient>> = if config.text_model_enabled {
            Some(Arc::new(HttpTextModelClient::new(
                config.text_model_endpoint.clone(),
                config.text_model_name.clone(),
                config.text_model_timeout,
            )))
        } else {
            None
        };
        Self::new(model)
    }

    fn prompt(message: &str, history: &[Conversation]) -> String {
        let context: String = history
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|c| format!("user: {}\nassistant: {}\n", c.message, c.response))
            .collect();
        format!(
            "Extract a travel search intent as JSON with keys `intent` \
             (one of search, search_flights, search_hotels, plan_trip, \
             find_deals, track, refine, question), `entities` (an object \
             with optional origin, destination, start_date, end_date, \
             budget_max, party_size, preferences), and `confidence` \
             (0.0-1.0).\n{context}user: {message}\njson:"
        )
    }

    fn parse_model_output(raw: &str) -> Option<ParsedIntent> {
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        if end < start {
            return None;
        }
        let candidate = &raw[start..=end];
        let value: Value = serde_json::from_str(candidate).ok()?;
        let intent = value.get("intent").and_then(Value::as_str)?;
        let entities = value.get("entities").cloned().unwrap_or(Value::Object(Default::default()));
        let confidence = value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        Some(ParsedIntent {
            intent: Intent::from_str(intent),
            entities,
            confidence,
        })
    }

    /// Rejects a model result whose origin/destination entities look
    /// fabricated: not a 3-letter code and not a known city alias, not
    /// textually present anywhere in the raw message, overlapping a
    /// stopword, or implausibly long.
    fn entities_look_valid(message: &str, entities: &Value) -> bool {
        for key in ["origin", "destination"] {
            let Some(value) = entities.get(key).and_then(Value::as_str) else {
                continue;
            };
            if value.len() > 20 || aliases::is_stopword(value) {
                return false;
            }
            let trimmed = value.trim();
            let looks_like_code = trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic());
            if !looks_like_code && aliases::city_to_code(trimmed).is_none() {
                return false;
            }
            if key == "destination" && !aliases::destination_present_in_text(message, trimmed) {
                return false;
            }
        }
        true
    }

    /// Parses `message`, preferring the text model when one is configured
    /// and falls back to the deterministic regex parser when the model is
    /// absent, errors, times out, returns something unparseable, or
    /// extracts entities that don't validate against the message. Caches
    /// the final result per exact message text so repeated chat turns
    /// (refreshes, retries) skip the external call entirely.
    pub async fn parse(&self, message: &str, history: &[Conversation], cache: &Cache) -> ParsedIntent {
        let cache_key = crate::cache::cache_key(&[message]);
        if let Some(cached) = cache.intent.get::<ParsedIntent>(&cache_key) {
            return cached;
        }

        let parsed = self.parse_uncached(message, history).await;
        cache.intent.put(cache_key, &parsed);
        parsed
    }

    async fn parse_uncached(&self, message: &str, history: &[Conversation]) -> ParsedIntent {
        if let Some(model) = &self.model {
            let prompt = Self::prompt(message, history);
            match model.complete(&prompt).await {
                Ok(raw) => match Self::parse_model_output(&raw) {
                    Some(parsed) if Self::entities_look_valid(message, &parsed.entities) => return parsed,
                    Some(_) => warn!("text model entities failed validation, falling back to regex parser"),
                    None => warn!("text model returned unparseable output, falling back to regex parser"),
                },
                Err(err) => warn!(error = %err, "text model call failed, falling back to regex parser"),
            }
        }

        fallback::parse(message, history)
    }
}
