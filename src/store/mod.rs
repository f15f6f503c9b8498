//! SQLite-backed persistence.
//!
//! One connection guarded by a single mutex, WAL journaling, and explicit
//! `BEGIN IMMEDIATE` / `COMMIT` transactions around multi-statement writes.
//! This mirrors the upstream signal store: a single writer, short critical
//! sections, no connection pool.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    Conversation, Deal, DealEvent, DealMetadata, DealType, PriceWatch, TripPlan, UserPreference,
};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS deals (
    deal_id         TEXT PRIMARY KEY,
    deal_type       TEXT NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT NOT NULL,
    price           REAL NOT NULL,
    original_price  REAL NOT NULL,
    avg_30d_price   REAL NOT NULL,
    discount_percent REAL NOT NULL,
    score           INTEGER NOT NULL,
    tags            TEXT NOT NULL,
    metadata        TEXT NOT NULL,
    expires_at      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    active          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_deals_type_active ON deals(deal_type, active);

CREATE TABLE IF NOT EXISTS price_history (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    deal_id             TEXT NOT NULL,
    price               REAL NOT NULL,
    available_inventory INTEGER,
    recorded_at         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_price_history_deal_time ON price_history(deal_id, recorded_at);

CREATE TABLE IF NOT EXISTS price_watches (
    watch_id            TEXT PRIMARY KEY,
    user_id             TEXT NOT NULL,
    deal_id             TEXT NOT NULL,
    price_threshold     REAL,
    inventory_threshold INTEGER,
    active              INTEGER NOT NULL,
    last_notified       TEXT,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_watches_deal_active ON price_watches(deal_id, active);
CREATE INDEX IF NOT EXISTS idx_watches_user ON price_watches(user_id);

CREATE TABLE IF NOT EXISTS trip_plans (
    plan_id         TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    query_snapshot  TEXT NOT NULL,
    flight_deal_id  TEXT NOT NULL,
    hotel_deal_id   TEXT NOT NULL,
    total_cost      REAL NOT NULL,
    fit_score       INTEGER NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trip_plans_user ON trip_plans(user_id);

CREATE TABLE IF NOT EXISTS conversations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,
    message     TEXT NOT NULL,
    response    TEXT NOT NULL,
    intent      TEXT NOT NULL,
    entities    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_user_time ON conversations(user_id, created_at);

CREATE TABLE IF NOT EXISTS user_preferences (
    user_id                 TEXT PRIMARY KEY,
    budget_max              REAL,
    frequent_routes         TEXT NOT NULL,
    favorite_destinations   TEXT NOT NULL,
    preferred_airlines      TEXT NOT NULL,
    direct_flights_only     INTEGER NOT NULL,
    time_preference         TEXT,
    search_count            INTEGER NOT NULL,
    updated_at              TEXT NOT NULL
);
";

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

fn row_to_deal(row: &Row) -> rusqlite::Result<Deal> {
    let deal_type_str: String = row.get("deal_type")?;
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Deal {
        deal_id: row.get("deal_id")?,
        deal_type: if deal_type_str == "flight" {
            DealType::Flight
        } else {
            DealType::Hotel
        },
        title: row.get("title")?,
        description: row.get("description")?,
        price: row.get("price")?,
        original_price: row.get("original_price")?,
        avg_30d_price: row.get("avg_30d_price")?,
        discount_percent: row.get("discount_percent")?,
        score: row.get::<_, i64>("score")? as u32,
        tags: serde_json::from_str::<HashSet<String>>(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str::<DealMetadata>(&metadata_json).unwrap_or(
            DealMetadata::Hotel {
                city: String::new(),
                state: None,
                address: None,
                rating: 0.0,
                amenities: Vec::new(),
                rooms_left: 0,
            },
        ),
        expires_at: expires_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))),
        created_at: parse_dt(&created_at),
        updated_at: parse_dt(&updated_at),
        active: row.get::<_, i64>("active")? != 0,
    })
}

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Store {
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Writes the deal row and a price-history point inside a single
    /// transaction, returning the event the caller should publish once the
    /// transaction has committed. A deal_id not previously seen yields
    /// `NewDeal`; an existing deal whose price has changed yields
    /// `PriceUpdate`; an existing deal with an unchanged price yields `None`
    /// (refreshed metadata and inventory still land, just without an event).
    pub fn persist_deal(&self, deal: &Deal) -> anyhow::Result<Option<DealEvent>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let previous_price: Option<f64> = tx
            .query_row(
                "SELECT price FROM deals WHERE deal_id = ?1",
                params![deal.deal_id],
                |row| row.get(0),
            )
            .optional()?;

        let tags_json = serde_json::to_string(&deal.tags)?;
        let metadata_json = serde_json::to_string(&deal.metadata)?;

        tx.execute(
            "INSERT INTO deals (
                deal_id, deal_type, title, description, price, original_price,
                avg_30d_price, discount_percent, score, tags, metadata,
                expires_at, created_at, updated_at, active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(deal_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                price = excluded.price,
                original_price = excluded.original_price,
                avg_30d_price = excluded.avg_30d_price,
                discount_percent = excluded.discount_percent,
                score = excluded.score,
                tags = excluded.tags,
                metadata = excluded.metadata,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at,
                active = excluded.active",
            params![
                deal.deal_id,
                deal.deal_type.as_str(),
                deal.title,
                deal.description,
                deal.price,
                deal.original_price,
                deal.avg_30d_price,
                deal.discount_percent,
                deal.score as i64,
                tags_json,
                metadata_json,
                deal.expires_at.map(|d| d.to_rfc3339()),
                deal.created_at.to_rfc3339(),
                deal.updated_at.to_rfc3339(),
                deal.active as i64,
            ],
        )?;

        tx.execute(
            "INSERT INTO price_history (deal_id, price, available_inventory, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                deal.deal_id,
                deal.price,
                deal.metadata.inventory(),
                deal.updated_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;

        let event = match previous_price {
            None => Some(DealEvent::NewDeal {
                deal_id: deal.deal_id.clone(),
                data: deal.clone(),
            }),
            Some(old_price) if (old_price - deal.price).abs() > f64::EPSILON => {
                Some(DealEvent::PriceUpdate {
                    deal_id: deal.deal_id.clone(),
                    old_price,
                    new_price: deal.price,
                    data: deal.clone(),
                })
            }
            Some(_) => None,
        };

        Ok(event)
    }

    pub fn get_deal(&self, deal_id: &str) -> anyhow::Result<Option<Deal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM deals WHERE deal_id = ?1")?;
        Ok(stmt
            .query_row(params![deal_id], row_to_deal)
            .optional()?)
    }

    pub fn avg_30d_price(&self, deal_id: &str) -> anyhow::Result<f64> {
        let conn = self.conn.lock();
        let cutoff = (Utc::now() - chrono::Duration::days(30)).to_rfc3339();
        let avg: Option<f64> = conn.query_row(
            "SELECT AVG(price) FROM price_history WHERE deal_id = ?1 AND recorded_at >= ?2",
            params![deal_id, cutoff],
            |row| row.get(0),
        )?;
        Ok(avg.unwrap_or(0.0))
    }

    /// Active `PriceWatch` count per `deal_id`, for HotDealMonitor's
    /// trending scan (three or more active watches on a deal).
    pub fn active_watch_counts_by_deal(&self) -> anyhow::Result<std::collections::HashMap<String, i64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT deal_id, COUNT(*) FROM price_watches WHERE active = 1 GROUP BY deal_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut out = std::collections::HashMap::new();
        for row in rows {
            let (deal_id, count) = row?;
            out.insert(deal_id, count);
        }
        Ok(out)
    }

    /// Active deals first persisted at or after `cutoff`, for the hot-deal
    /// scan's recency window.
    pub fn list_deals_created_since(&self, cutoff: DateTime<Utc>) -> anyhow::Result<Vec<Deal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM deals WHERE active = 1 AND created_at >= ?1",
        )?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], row_to_deal)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_active_deals(&self, deal_type: Option<DealType>) -> anyhow::Result<Vec<Deal>> {
        let conn = self.conn.lock();
        let mut out = Vec::new();
        match deal_type {
            Some(t) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT * FROM deals WHERE active = 1 AND deal_type = ?1",
                )?;
                let rows = stmt.query_map(params![t.as_str()], row_to_deal)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached("SELECT * FROM deals WHERE active = 1")?;
                let rows = stmt.query_map([], row_to_deal)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Flights whose origin/destination matches any of the given airport
    /// codes, used by the trip planner after alias expansion.
    pub fn search_flights(&self, origins: &[String], destinations: &[String]) -> anyhow::Result<Vec<Deal>> {
        let deals = self.list_active_deals(Some(DealType::Flight))?;
        Ok(deals
            .into_iter()
            .filter(|d| match &d.metadata {
                DealMetadata::Flight {
                    origin,
                    destination,
                    ..
                } => {
                    (origins.is_empty() || origins.iter().any(|o| o == origin))
                        && (destinations.is_empty() || destinations.iter().any(|dst| dst == destination))
                }
                _ => false,
            })
            .collect())
    }

    /// Hotels whose city substring-matches any of the given city names.
    pub fn search_hotels(&self, cities: &[String]) -> anyhow::Result<Vec<Deal>> {
        let deals = self.list_active_deals(Some(DealType::Hotel))?;
        Ok(deals
            .into_iter()
            .filter(|d| match &d.metadata {
                DealMetadata::Hotel { city, .. } => {
                    cities.is_empty()
                        || cities
                            .iter()
                            .any(|c| city.to_uppercase().contains(&c.to_uppercase()))
                }
                _ => false,
            })
            .collect())
    }

    pub fn create_watch(&self, watch: &PriceWatch) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO price_watches (
                watch_id, user_id, deal_id, price_threshold, inventory_threshold,
                active, last_notified, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                watch.watch_id,
                watch.user_id,
                watch.deal_id,
                watch.price_threshold,
                watch.inventory_threshold,
                watch.active as i64,
                watch.last_notified.map(|d| d.to_rfc3339()),
                watch.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_active_watches(&self) -> anyhow::Result<Vec<PriceWatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM price_watches WHERE active = 1")?;
        let rows = stmt.query_map([], |row| {
            let last_notified: Option<String> = row.get("last_notified")?;
            let created_at: String = row.get("created_at")?;
            Ok(PriceWatch {
                watch_id: row.get("watch_id")?,
                user_id: row.get("user_id")?,
                deal_id: row.get("deal_id")?,
                price_threshold: row.get("price_threshold")?,
                inventory_threshold: row.get("inventory_threshold")?,
                active: row.get::<_, i64>("active")? != 0,
                last_notified: last_notified.map(|s| parse_dt(&s)),
                created_at: parse_dt(&created_at),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_watches_by_user(&self, user_id: &str) -> anyhow::Result<Vec<PriceWatch>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT * FROM price_watches WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| {
            let last_notified: Option<String> = row.get("last_notified")?;
            let created_at: String = row.get("created_at")?;
            Ok(PriceWatch {
                watch_id: row.get("watch_id")?,
                user_id: row.get("user_id")?,
                deal_id: row.get("deal_id")?,
                price_threshold: row.get("price_threshold")?,
                inventory_threshold: row.get("inventory_threshold")?,
                active: row.get::<_, i64>("active")? != 0,
                last_notified: last_notified.map(|s| parse_dt(&s)),
                created_at: parse_dt(&created_at),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn touch_watch_notified(&self, watch_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE price_watches SET last_notified = ?1 WHERE watch_id = ?2",
            params![at.to_rfc3339(), watch_id],
        )?;
        Ok(())
    }

    pub fn deactivate_watch(&self, watch_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE price_watches SET active = 0 WHERE watch_id = ?1",
            params![watch_id],
        )?;
        Ok(())
    }

    pub fn save_trip_plan(&self, plan: &TripPlan) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trip_plans (
                plan_id, user_id, query_snapshot, flight_deal_id, hotel_deal_id,
                total_cost, fit_score, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                plan.plan_id,
                plan.user_id,
                plan.query_snapshot.to_string(),
                plan.itinerary.flight_deal_id,
                plan.itinerary.hotel_deal_id,
                plan.total_cost,
                plan.fit_score as i64,
                plan.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn append_conversation(&self, entry: &Conversation) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (user_id, message, response, intent, entities, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.user_id,
                entry.message,
                entry.response,
                entry.intent,
                entry.entities.to_string(),
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn recent_conversations(&self, user_id: &str, limit: u32) -> anyhow::Result<Vec<Conversation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM conversations WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            let created_at: String = row.get("created_at")?;
            let entities: String = row.get("entities")?;
            Ok(Conversation {
                user_id: row.get("user_id")?,
                message: row.get("message")?,
                response: row.get("response")?,
                intent: row.get("intent")?,
                entities: serde_json::from_str(&entities).unwrap_or(serde_json::Value::Null),
                created_at: parse_dt(&created_at),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn get_user_preference(&self, user_id: &str) -> anyhow::Result<UserPreference> {
        let conn = self.conn.lock();
        let found = conn
            .query_row(
                "SELECT * FROM user_preferences WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let updated_at: String = row.get("updated_at")?;
                    Ok(UserPreference {
                        user_id: row.get("user_id")?,
                        budget_max: row.get("budget_max")?,
                        frequent_routes: serde_json::from_str(&row.get::<_, String>("frequent_routes")?)
                            .unwrap_or_default(),
                        favorite_destinations: serde_json::from_str(
                            &row.get::<_, String>("favorite_destinations")?,
                        )
                        .unwrap_or_default(),
                        preferred_airlines: serde_json::from_str(
                            &row.get::<_, String>("preferred_airlines")?,
                        )
                        .unwrap_or_default(),
                        direct_flights_only: row.get::<_, i64>("direct_flights_only")? != 0,
                        time_preference: row.get("time_preference")?,
                        search_count: row.get::<_, i64>("search_count")? as u64,
                        updated_at: parse_dt(&updated_at),
                    })
                },
            )
            .optional()?;
        Ok(found.unwrap_or_else(|| UserPreference::new(user_id)))
    }

    pub fn save_user_preference(&self, pref: &UserPreference) -> anyhow::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_preferences (
                user_id, budget_max, frequent_routes, favorite_destinations,
                preferred_airlines, direct_flights_only, time_preference,
                search_count, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(user_id) DO UPDATE SET
                budget_max = excluded.budget_max,
                frequent_routes = excluded.frequent_routes,
                favorite_destinations = excluded.favorite_destinations,
                preferred_airlines = excluded.preferred_airlines,
                direct_flights_only = excluded.direct_flights_only,
                time_preference = excluded.time_preference,
                search_count = excluded.search_count,
                updated_at = excluded.updated_at",
            params![
                pref.user_id,
                pref.budget_max,
                serde_json::to_string(&pref.frequent_routes)?,
                serde_json::to_string(&pref.favorite_destinations)?,
                serde_json::to_string(&pref.preferred_airlines)?,
                pref.direct_flights_only as i64,
                pref.time_preference,
                pref.search_count as i64,
                pref.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Deactivates deals past their `expires_at` and prunes price history,
    /// conversations, and trip plans older than `retention_days`. Run
    /// periodically, not on a hot path.
    pub fn sweep_retention(&self, retention_days: i64) -> anyhow::Result<RetentionSweep> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        let expired_deals = conn.execute(
            "UPDATE deals SET active = 0 WHERE active = 1 AND expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;

        let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
        let pruned_history = conn.execute(
            "DELETE FROM price_history WHERE recorded_at < ?1",
            params![cutoff],
        )?;
        let pruned_conversations = conn.execute(
            "DELETE FROM conversations WHERE created_at < ?1",
            params![cutoff],
        )?;
        let pruned_plans = conn.execute(
            "DELETE FROM trip_plans WHERE created_at < ?1",
            params![cutoff],
        )?;

        Ok(RetentionSweep {
            expired_deals,
            pruned_history,
            pruned_conversations,
            pruned_plans,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetentionSweep {
    pub expired_deals: usize,
    pub pruned_history: usize,
    pub pruned_conversations: usize,
    pub pruned_plans: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DealMetadata;

    fn sample_flight(id: &str, price: f64) -> Deal {
        let now = Utc::now();
        Deal {
            deal_id: id.to_string(),
            deal_type: DealType::Flight,
            title: "JFK to LHR".to_string(),
            description: "nonstop".to_string(),
            price,
            original_price: price + 100.0,
            avg_30d_price: 0.0,
            discount_percent: 0.0,
            score: 0,
            tags: HashSet::new(),
            metadata: DealMetadata::Flight {
                origin: "JFK".to_string(),
                destination: "LHR".to_string(),
                airline: "Delta".to_string(),
                departure: None,
                arrival: None,
                cabin_class: "economy".to_string(),
                baggage_included: true,
                flight_code: None,
                seats_left: 4,
            },
            expires_at: None,
            created_at: now,
            updated_at: now,
            active: true,
        }
    }

    #[test]
    fn persist_deal_yields_new_deal_then_price_update() {
        let store = Store::in_memory().unwrap();
        let deal = sample_flight("deal-1", 400.0);

        let first = store.persist_deal(&deal).unwrap();
        assert!(matches!(first, Some(DealEvent::NewDeal { .. })));

        let mut repriced = deal.clone();
        repriced.price = 350.0;
        repriced.updated_at = Utc::now();
        let second = store.persist_deal(&repriced).unwrap();
        assert!(matches!(second, Some(DealEvent::PriceUpdate { .. })));

        let mut unchanged = repriced.clone();
        unchanged.updated_at = Utc::now();
        let third = store.persist_deal(&unchanged).unwrap();
        assert!(third.is_none());
    }

    #[test]
    fn search_flights_filters_by_route() {
        let store = Store::in_memory().unwrap();
        store.persist_deal(&sample_flight("deal-1", 400.0)).unwrap();

        let matches = store
            .search_flights(&["JFK".to_string()], &["LHR".to_string()])
            .unwrap();
        assert_eq!(matches.len(), 1);

        let none = store
            .search_flights(&["LAX".to_string()], &["LHR".to_string()])
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn retention_sweep_deactivates_expired_deals() {
        let store = Store::in_memory().unwrap();
        let mut deal = sample_flight("deal-1", 400.0);
        deal.expires_at = Some(Utc::now() - chrono::Duration::days(1));
        store.persist_deal(&deal).unwrap();

        let sweep = store.sweep_retention(30).unwrap();
        assert_eq!(sweep.expired_deals, 1);
        assert!(!store.get_deal("deal-1").unwrap().unwrap().active);
    }

    #[test]
    fn retention_sweep_evicts_old_conversations() {
        let store = Store::in_memory().unwrap();
        store
            .append_conversation(&Conversation {
                user_id: "u1".to_string(),
                message: "old".to_string(),
                response: "old".to_string(),
                intent: "unknown".to_string(),
                entities: serde_json::Value::Null,
                created_at: Utc::now() - chrono::Duration::days(60),
            })
            .unwrap();
        store
            .append_conversation(&Conversation {
                user_id: "u1".to_string(),
                message: "fresh".to_string(),
                response: "fresh".to_string(),
                intent: "unknown".to_string(),
                entities: serde_json::Value::Null,
                created_at: Utc::now(),
            })
            .unwrap();

        let sweep = store.sweep_retention(30).unwrap();
        assert_eq!(sweep.pruned_conversations, 1);
        let remaining = store.recent_conversations("u1", 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "fresh");
    }
}
