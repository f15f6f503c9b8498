//! Application configuration.
//!
//! Mirrors the upstream system's `config.py`: a flat set of environment-derived
//! constants with safe defaults, loaded once at startup.

use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"),
        Err(_) => default,
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store_path: String,
    pub cache_capacity: u64,

    // Bus / consumer group identity (kept for interface parity with a real broker).
    pub bus_bootstrap: String,
    pub consumer_group_id: String,

    // Text-model client.
    pub text_model_enabled: bool,
    pub text_model_endpoint: String,
    pub text_model_name: String,
    pub text_model_timeout: Duration,

    // Scoring.
    pub scorer_min_score: u32,

    // Trip planning.
    pub max_bundle_recommendations: usize,
    pub trip_planner_top_flights: usize,
    pub trip_planner_top_hotels: usize,

    // Explanation / policy word budgets.
    pub explanation_max_words: usize,
    pub watch_alert_max_words: usize,

    // Background loop intervals.
    pub feed_ingestion_interval: Duration,
    pub watch_check_interval: Duration,
    pub watch_realert_window: Duration,
    pub hot_deal_check_interval: Duration,
    pub hot_deal_trending_every_n_ticks: u32,
    pub retention_sweep_interval: Duration,
    pub retention_days: i64,

    // Hot-deal thresholds: two independent knobs, OR'd together.
    pub hot_deal_savings_percent_threshold: f64,
    pub hot_deal_discount_dollars_threshold: f64,

    // SessionHub.
    pub heartbeat_interval: Duration,
    pub session_stale_timeout: Duration,
    pub session_max_queued_messages: usize,
    pub session_max_consecutive_failures: u32,

    // Cache TTLs.
    pub cache_ttl_intent: Duration,
    pub cache_ttl_policy: Duration,
    pub cache_ttl_trip_plan: Duration,
    pub cache_ttl_deal_search: Duration,
    pub cache_ttl_explanation: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            port: env_parsed("PORT", 8080),
            store_path: env_or("STORE_PATH", "./kayak_deals.db"),
            cache_capacity: env_parsed("CACHE_CAPACITY", 10_000),

            bus_bootstrap: env_or("BUS_BOOTSTRAP", "inproc://deal-pipeline"),
            consumer_group_id: env_or("CONSUMER_GROUP_ID", "deal-engine"),

            text_model_enabled: env_bool("TEXT_MODEL_ENABLED", true),
            text_model_endpoint: env_or("TEXT_MODEL_ENDPOINT", "http://localhost:11434"),
            text_model_name: env_or("TEXT_MODEL_NAME", "llama3"),
            text_model_timeout: Duration::from_secs(env_parsed("TEXT_MODEL_TIMEOUT_SECS", 10)),

            scorer_min_score: env_parsed("SCORER_MIN_SCORE", 0),

            max_bundle_recommendations: env_parsed("MAX_BUNDLE_RECOMMENDATIONS", 3),
            trip_planner_top_flights: env_parsed("TRIP_PLANNER_TOP_FLIGHTS", 10),
            trip_planner_top_hotels: env_parsed("TRIP_PLANNER_TOP_HOTELS", 5),

            explanation_max_words: env_parsed("EXPLANATION_MAX_WORDS", 25),
            watch_alert_max_words: env_parsed("WATCH_ALERT_MAX_WORDS", 12),

            feed_ingestion_interval: Duration::from_secs(env_parsed(
                "FEED_INGESTION_INTERVAL_SECS",
                300,
            )),
            watch_check_interval: Duration::from_secs(env_parsed(
                "WATCH_CHECK_INTERVAL_SECS",
                30,
            )),
            watch_realert_window: Duration::from_secs(env_parsed(
                "WATCH_REALERT_WINDOW_SECS",
                env_parsed("WATCH_CHECK_INTERVAL_SECS", 30),
            )),
            hot_deal_check_interval: Duration::from_secs(env_parsed(
                "HOT_DEAL_CHECK_INTERVAL_SECS",
                60,
            )),
            hot_deal_trending_every_n_ticks: env_parsed("HOT_DEAL_TRENDING_EVERY_N_TICKS", 5),
            retention_sweep_interval: Duration::from_secs(env_parsed(
                "RETENTION_SWEEP_INTERVAL_SECS",
                3600,
            )),
            retention_days: env_parsed("RETENTION_DAYS", 30),

            hot_deal_savings_percent_threshold: env_parsed(
                "HOT_DEAL_SAVINGS_PERCENT_THRESHOLD",
                30.0,
            ),
            hot_deal_discount_dollars_threshold: env_parsed(
                "HOT_DEAL_DISCOUNT_DOLLARS_THRESHOLD",
                200.0,
            ),

            heartbeat_interval: Duration::from_secs(env_parsed("WS_HEARTBEAT_INTERVAL_SECS", 30)),
            session_stale_timeout: Duration::from_secs(env_parsed(
                "SESSION_STALE_TIMEOUT_SECS",
                90,
            )),
            session_max_queued_messages: env_parsed("SESSION_MAX_QUEUED_MESSAGES", 100),
            session_max_consecutive_failures: env_parsed("SESSION_MAX_CONSECUTIVE_FAILURES", 3),

            cache_ttl_intent: Duration::from_secs(env_parsed("CACHE_TTL_INTENT_SECS", 7_200)),
            cache_ttl_policy: Duration::from_secs(env_parsed("CACHE_TTL_POLICY_SECS", 86_400)),
            cache_ttl_trip_plan: Duration::from_secs(env_parsed("CACHE_TTL_TRIP_PLAN_SECS", 1_800)),
            cache_ttl_deal_search: Duration::from_secs(env_parsed(
                "CACHE_TTL_DEAL_SEARCH_SECS",
                600,
            )),
            cache_ttl_explanation: Duration::from_secs(env_parsed(
                "CACHE_TTL_EXPLANATION_SECS",
                3_600,
            )),
        })
    }
}
