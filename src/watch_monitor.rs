//! Periodically checks active price watches against current deal state and
//! fires at most one alert per watch per re-alert window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::models::{Deal, PriceWatch};
use crate::shutdown::ShutdownToken;
use crate::store::Store;

const BACKOFF_AFTER_FAILURE: Duration = Duration::from_secs(10);

pub trait WatchAlertSink: Send + Sync {
    fn on_watch_alert(&self, watch: &PriceWatch, deal: &Deal, reasons: &[String], summary: &str);
}

fn firing_reasons(watch: &PriceWatch, deal: &Deal) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(threshold) = watch.price_threshold {
        if deal.price < threshold {
            reasons.push(format!("price {:.2} dropped below threshold {:.2}", deal.price, threshold));
        }
    }
    if let Some(threshold) = watch.inventory_threshold {
        let inventory = deal.metadata.inventory();
        if inventory < threshold {
            reasons.push(format!("inventory {inventory} dropped below threshold {threshold}"));
        }
    }
    reasons
}

/// One short line for the alert frame, bounded by the configured word
/// budget so the client-facing text stays glanceable.
fn alert_summary(watch: &PriceWatch, deal: &Deal, max_words: usize) -> String {
    let text = if watch.price_threshold.map(|t| deal.price < t).unwrap_or(false) {
        format!("{} dropped to ${:.0}", deal.title, deal.price)
    } else {
        format!("{}: only {} left", deal.title, deal.metadata.inventory())
    };
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        text
    } else {
        words[..max_words].join(" ")
    }
}

pub struct WatchMonitor {
    store: Arc<Store>,
    sink: Option<Arc<dyn WatchAlertSink>>,
    realert_window: Duration,
    alert_max_words: usize,
}

impl WatchMonitor {
    pub fn new(store: Arc<Store>, realert_window: Duration, alert_max_words: usize) -> Self {
        Self {
            store,
            sink: None,
            realert_window,
            alert_max_words,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn WatchAlertSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn threshold_crossed(watch: &PriceWatch, deal: &Deal) -> bool {
        let price_hit = watch
            .price_threshold
            .map(|threshold| deal.price < threshold)
            .unwrap_or(false);
        let inventory_hit = watch
            .inventory_threshold
            .map(|threshold| deal.metadata.inventory() < threshold)
            .unwrap_or(false);
        price_hit || inventory_hit
    }

    fn throttled(&self, watch: &PriceWatch) -> bool {
        match watch.last_notified {
            Some(last) => {
                let elapsed = Utc::now() - last;
                elapsed < chrono::Duration::from_std(self.realert_window).unwrap_or_default()
            }
            None => false,
        }
    }

    pub fn tick(&self) -> anyhow::Result<usize> {
        let watches = self.store.list_active_watches()?;
        let mut alerted = 0;

        for watch in watches {
            let Some(deal) = self.store.get_deal(&watch.deal_id)? else {
                self.store.deactivate_watch(&watch.watch_id)?;
                continue;
            };
            if !deal.active || !Self::threshold_crossed(&watch, &deal) || self.throttled(&watch) {
                continue;
            }

            let reasons = firing_reasons(&watch, &deal);
            if let Some(sink) = &self.sink {
                let summary = alert_summary(&watch, &deal, self.alert_max_words);
                sink.on_watch_alert(&watch, &deal, &reasons, &summary);
            }
            self.store.touch_watch_notified(&watch.watch_id, Utc::now())?;
            alerted += 1;
        }

        Ok(alerted)
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: ShutdownToken) {
        let mut ticker = tokio::time::interval(interval);
        'outer: loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick() {
                        Ok(count) => info!(count, "watch monitor tick"),
                        Err(err) => {
                            warn!(error = %err, "watch monitor tick failed, backing off");
                            tokio::select! {
                                _ = tokio::time::sleep(BACKOFF_AFTER_FAILURE) => {}
                                _ = cancel.cancelled() => break 'outer,
                            }
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!("watch monitor shutting down");
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
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    impl WatchAlertSink for CountingSink {
        fn on_watch_alert(&self, _watch: &PriceWatch, _deal: &Deal, _reasons: &[String], _summary: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_deal(price: f64) -> Deal {
        let now = Utc::now();
        Deal {
            deal_id: "deal-1".to_string(),
            deal_type: DealType::Flight,
            title: "t".to_string(),
            description: "d".to_string(),
            price,
            original_price: 500.0,
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
    fn alerts_once_then_throttles_within_window() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_deal(300.0)).unwrap();
        store
            .create_watch(&PriceWatch {
                watch_id: Uuid::new_v4().to_string(),
                user_id: "user-1".to_string(),
                deal_id: "deal-1".to_string(),
                price_threshold: Some(350.0),
                inventory_threshold: None,
                active: true,
                last_notified: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let monitor = WatchMonitor::new(store, Duration::from_secs(3600), 12)
            .with_sink(Arc::new(CountingSink { count: count.clone() }));

        assert_eq!(monitor.tick().unwrap(), 1);
        assert_eq!(monitor.tick().unwrap(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn does_not_alert_when_threshold_not_crossed() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.persist_deal(&sample_deal(450.0)).unwrap();
        store
            .create_watch(&PriceWatch {
                watch_id: Uuid::new_v4().to_string(),
                user_id: "user-1".to_string(),
                deal_id: "deal-1".to_string(),
                price_threshold: Some(350.0),
                inventory_threshold: None,
                active: true,
                last_notified: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let monitor = WatchMonitor::new(store, Duration::from_secs(30), 12);
        assert_eq!(monitor.tick().unwrap(), 0);
    }

    #[test]
    fn deactivates_watch_when_deal_is_gone() {
        let store = Arc::new(Store::in_memory().unwrap());
        let watch_id = Uuid::new_v4().to_string();
        store
            .create_watch(&PriceWatch {
                watch_id: watch_id.clone(),
                user_id: "user-1".to_string(),
                deal_id: "missing-deal".to_string(),
                price_threshold: Some(350.0),
                inventory_threshold: None,
                active: true,
                last_notified: None,
                created_at: Utc::now(),
            })
            .unwrap();

        let monitor = WatchMonitor::new(store.clone(), Duration::from_secs(30), 12);
        assert_eq!(monitor.tick().unwrap(), 0);
        assert!(store.list_active_watches().unwrap().is_empty());
    }
}
