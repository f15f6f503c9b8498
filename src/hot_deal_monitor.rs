//! Scans recently-persisted deals for ones that cross either of two
//! independent "hot deal" thresholds, and every Nth tick additionally scans
//! all active deals for three or more active price watches ("trending").
//! Both scans share one bounded seen-set, so a deal is broadcast at most
//! once however many ticks it stays eligible.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::models::Deal;
use crate::shutdown::ShutdownToken;
use crate::store::Store;

const BACKOFF_AFTER_FAILURE: Duration = Duration::from_secs(10);

pub trait HotDealSink: Send + Sync {
    fn on_hot_deal(&self, deal: &Deal);
    fn on_trending_deal(&self, deal: &Deal, watch_count: i64);
}

/// A deal counts as trending once three or more active `PriceWatch` rows
/// point at it: interest from multiple watchers, not a price trajectory.
const TRENDING_WATCH_THRESHOLD: i64 = 3;

/// The hot scan only considers deals first persisted within this many
/// hours; older inventory is no longer "news" however steep its discount.
const HOT_DEAL_RECENCY_HOURS: i64 = 1;

/// Bounded set that evicts the oldest inserted key once full, so the
/// "already alerted" memory doesn't grow without bound across a long-running
/// process.
struct BoundedSeenSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl BoundedSeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    fn insert(&mut self, key: String) {
        if self.set.contains(&key) {
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.set.insert(key);
    }
}

const SEEN_SET_CAPACITY: usize = 1_000;

pub struct HotDealMonitor {
    store: Arc<Store>,
    sink: Option<Arc<dyn HotDealSink>>,
    savings_percent_threshold: f64,
    discount_dollars_threshold: f64,
    trending_every_n_ticks: u32,
    seen: Mutex<BoundedSeenSet>,
    tick_count: AtomicU64,
}

impl HotDealMonitor {
    pub fn new(
        store: Arc<Store>,
        savings_percent_threshold: f64,
        discount_dollars_threshold: f64,
        trending_every_n_ticks: u32,
    ) -> Self {
        Self {
            store,
            sink: None,
            savings_percent_threshold,
            discount_dollars_threshold,
            trending_every_n_ticks: trending_every_n_ticks.max(1),
            seen: Mutex::new(BoundedSeenSet::new(SEEN_SET_CAPACITY)),
            tick_count: AtomicU64::new(0),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn HotDealSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn is_hot(&self, deal: &Deal) -> bool {
        let dollar_discount = deal.original_price - deal.price;
        deal.discount_percent > self.savings_percent_threshold
            || dollar_discount > self.discount_dollars_threshold
    }

    pub fn tick(&self) -> anyhow::Result<(usize, usize)> {
        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst);
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(HOT_DEAL_RECENCY_HOURS);
        let recent = self.store.list_deals_created_since(cutoff)?;

        let mut hot_count = 0;
        for deal in &recent {
            if !self.is_hot(deal) {
                continue;
            }
            let mut seen = self.seen.lock();
            if seen.contains(&deal.deal_id) {
                continue;
            }
            seen.insert(deal.deal_id.clone());
            drop(seen);

            if let Some(sink) = &self.sink {
                sink.on_hot_deal(deal);
            }
            hot_count += 1;
        }

        let mut trending_count = 0;
        if tick % self.trending_every_n_ticks as u64 == 0 {
            let watch_counts = self.store.active_watch_counts_by_deal()?;
            let deals = self.store.list_active_deals(None)?;
            for deal in &deals {
                let watch_count = watch_counts.get(&deal.deal_id).copied().unwrap_or(0);
                if watch_count < TRENDING_WATCH_THRESHOLD {
                    continue;
                }
                let mut seen = self.seen.lock();
                if seen.contains(&deal.deal_id) {
                    continue;
                }
                seen.insert(deal.deal_id.clone());
                drop(seen);

                if let Some(sink) = &self.sink {
                    sink.on_trending_deal(deal, watch_count);
                }
                trending_count += 1;
            }
        }

        Ok((hot_count, trending_count))
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: ShutdownToken) {
        let mut ticker = tokio::time::interval(interval);
        'outer: loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick() {
                        Ok((hot, trending)) => info!(hot, trending, "hot deal monitor tick"),
                        Err(err) => {
                            warn!(error = %err, "hot deal monitor tick failed, backing off");
                            tokio::select! {
                                _ = tokio::time::sleep(BACKOFF_AFTER_FAILURE) => {}
                                _ = cancel.cancelled() => break 'outer,
                            }
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!("hot deal monitor shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DealMetadata, DealType};
    use std::collections::HashSet as StdHashSet;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct CountingSink {
        hot: Arc<AtomicUsize>,
        trending: Arc<AtomicUsize>,
    }

    impl HotDealSink for CountingSink {
        fn on_hot_deal(&self, _deal: &Deal) {
            self.hot.fetch_add(1, AtomicOrdering::SeqCst);
        }
        fn on_trending_deal(&self, _deal: &Deal, _watch_count: i64) {
            self.trending.fetch_add(1, AtomicOrdering::SeqCst);
        }
    }

    fn sample_deal(id: &str, price: f64, original_price: f64) -> Deal {
        let now = chrono::Utc::now();
        Deal {
            deal_id: id.to_string(),
            deal_type: DealType::Flight,
            title: "t".to_string(),
            description: "d".to_string(),
            price,
            original_price,
            avg_30d_price: 0.0,
            discount_percent: Deal::compute_discount_percent(original_price, price),
            score: 0,
            tags: StdHashSet::new(),
            metadata: DealMetadata::Flight {
                origin: "JFK".to_string(),
                destination: "LHR".to_string(),
                airline: "Delta".to_string(),
                departure: None,
                arrival: None,
                cabin_class: "economy".to_string(),
                baggage_included: false,
                flight_code: None,
                seats_left: 5,
            },
            expires_at: None,
            created_at: now,
            updated_at: now,
            active: true,
        }
    }

    #[test]
    fn hot_deal_alerts_once_per_deal() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_deal("deal-1", 300.0, 500.0)).unwrap();

        let hot = Arc::new(AtomicUsize::new(0));
        let trending = Arc::new(AtomicUsize::new(0));
        let monitor = HotDealMonitor::new(store, 30.0, 200.0, 5)
            .with_sink(Arc::new(CountingSink { hot: hot.clone(), trending: trending.clone() }));

        monitor.tick().unwrap();
        monitor.tick().unwrap();
        assert_eq!(hot.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn stale_deals_are_outside_the_hot_scan_window() {
        let store = Arc::new(Store::in_memory().unwrap());
        let mut old = sample_deal("deal-1", 300.0, 500.0);
        old.created_at = chrono::Utc::now() - chrono::Duration::hours(3);
        store.persist_deal(&old).unwrap();

        let monitor = HotDealMonitor::new(store, 30.0, 200.0, 5);
        let (hot, _) = monitor.tick().unwrap();
        assert_eq!(hot, 0);
    }

    #[test]
    fn dollar_threshold_alone_triggers_hot_deal() {
        let store = Arc::new(Store::in_memory().unwrap());
        // 10% off is below the percent threshold but $250 off clears the dollar one.
        store.persist_deal(&sample_deal("deal-1", 2250.0, 2500.0)).unwrap();

        let monitor = HotDealMonitor::new(store, 30.0, 200.0, 5);
        let (hot, _) = monitor.tick().unwrap();
        assert_eq!(hot, 1);
    }

    #[test]
    fn trending_requires_three_active_watches() {
        use crate::models::PriceWatch;
        use uuid::Uuid;

        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_deal("deal-1", 500.0, 600.0)).unwrap();
        for _ in 0..3 {
            store
                .create_watch(&PriceWatch {
                    watch_id: Uuid::new_v4().to_string(),
                    user_id: "user-1".to_string(),
                    deal_id: "deal-1".to_string(),
                    price_threshold: Some(400.0),
                    inventory_threshold: None,
                    active: true,
                    last_notified: None,
                    created_at: chrono::Utc::now(),
                })
                .unwrap();
        }

        let monitor = HotDealMonitor::new(store, 99.0, 99_999.0, 1);
        let (_, trending) = monitor.tick().unwrap();
        assert_eq!(trending, 1);
    }

    #[test]
    fn trending_broadcasts_once_per_deal() {
        use crate::models::PriceWatch;
        use uuid::Uuid;

        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_deal("deal-1", 500.0, 600.0)).unwrap();
        for _ in 0..3 {
            store
                .create_watch(&PriceWatch {
                    watch_id: Uuid::new_v4().to_string(),
                    user_id: "user-1".to_string(),
                    deal_id: "deal-1".to_string(),
                    price_threshold: Some(400.0),
                    inventory_threshold: None,
                    active: true,
                    last_notified: None,
                    created_at: chrono::Utc::now(),
                })
                .unwrap();
        }

        let hot = Arc::new(AtomicUsize::new(0));
        let trending = Arc::new(AtomicUsize::new(0));
        let monitor = HotDealMonitor::new(store, 99.0, 99_999.0, 1)
            .with_sink(Arc::new(CountingSink { hot, trending: trending.clone() }));

        monitor.tick().unwrap();
        monitor.tick().unwrap();
        assert_eq!(trending.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn exact_threshold_values_are_not_hot() {
        let store = Arc::new(Store::in_memory().unwrap());
        // Exactly $200 off (20%) and exactly 30% off ($150): both sit on a
        // boundary, and the thresholds are strict.
        store.persist_deal(&sample_deal("deal-1", 800.0, 1000.0)).unwrap();
        store.persist_deal(&sample_deal("deal-2", 350.0, 500.0)).unwrap();

        let monitor = HotDealMonitor::new(store, 30.0, 200.0, 5);
        let (hot, _) = monitor.tick().unwrap();
        assert_eq!(hot, 0);
    }

    #[test]
    fn two_watches_do_not_count_as_trending() {
        use crate::models::PriceWatch;
        use uuid::Uuid;

        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_deal("deal-1", 500.0, 600.0)).unwrap();
        for _ in 0..2 {
            store
                .create_watch(&PriceWatch {
                    watch_id: Uuid::new_v4().to_string(),
                    user_id: "user-1".to_string(),
                    deal_id: "deal-1".to_string(),
                    price_threshold: Some(400.0),
                    inventory_threshold: None,
                    active: true,
                    last_notified: None,
                    created_at: chrono::Utc::now(),
                })
                .unwrap();
        }

        let monitor = HotDealMonitor::new(store, 99.0, 99_999.0, 1);
        let (_, trending) = monitor.tick().unwrap();
        assert_eq!(trending, 0);
    }
}
