//! Wires every component together and owns the background task lifecycle.
//!
//! Mirrors the upstream `lifespan` orchestration: construct every stateful
//! component up front, subscribe the pipeline stages to the bus, spawn one
//! task per background loop, and hold a single shutdown signal all of them
//! share.

use std::sync::Arc;

use tracing::info;

use crate::bus::{InProcessBus, MessageBus};
use crate::cache::Cache;
use crate::config::Config;
use crate::explain::Explainer;
use crate::feed::{FeedIngester, SeedListingsSource};
use crate::hot_deal_monitor::HotDealMonitor;
use crate::intent::IntentParser;
use crate::pipeline::{Normalizer, Persister, Scorer, Tagger, TOPIC_NORMALIZED, TOPIC_RAW_FEEDS, TOPIC_SCORED, TOPIC_TAGGED};
use crate::policy::PolicyAnswerer;
use crate::session_hub::SessionHub;
use crate::shutdown::{ShutdownHandle, ShutdownToken};
use crate::store::Store;
use crate::trip_planner::TripPlanner;
use crate::watch_monitor::WatchMonitor;

pub struct Service {
    pub config: Config,
    pub store: Arc<Store>,
    pub cache: Arc<Cache>,
    pub bus: Arc<dyn MessageBus>,
    pub session_hub: Arc<SessionHub>,
    pub intent_parser: Arc<IntentParser>,
    pub explainer: Arc<Explainer>,
    pub policy_answerer: Arc<PolicyAnswerer>,
    pub trip_planner: Arc<TripPlanner>,
    shutdown: ShutdownHandle,
    pub shutdown_token: ShutdownToken,
}

impl Service {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(Store::new(&config.store_path)?);
        let cache = Arc::new(Cache::new(&config));
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let session_hub = Arc::new(SessionHub::new(
            config.session_stale_timeout,
            config.heartbeat_interval,
            config.session_max_consecutive_failures,
            config.session_max_queued_messages,
        ));

        let intent_parser = Arc::new(IntentParser::from_config(&config));
        let model_for_explainer = if config.text_model_enabled {
            Some(Arc::new(crate::intent::HttpTextModelClient::new(
                config.text_model_endpoint.clone(),
                config.text_model_name.clone(),
                config.text_model_timeout,
            )) as Arc<dyn crate::intent::TextModelClient>)
        } else {
            None
        };
        let explainer = Arc::new(Explainer::new(model_for_explainer.clone(), config.explanation_max_words));
        let policy_answerer = Arc::new(PolicyAnswerer::new(model_for_explainer));

        let trip_planner = Arc::new(TripPlanner::new(
            store.clone(),
            config.trip_planner_top_flights,
            config.trip_planner_top_hotels,
            config.max_bundle_recommendations,
        ));

        let (shutdown, shutdown_token) = ShutdownHandle::new();

        Ok(Self {
            config,
            store,
            cache,
            bus,
            session_hub,
            intent_parser,
            explainer,
            policy_answerer,
            trip_planner,
            shutdown,
            shutdown_token,
        })
    }

    /// Subscribes each pipeline stage to its upstream topic and spawns the
    /// feed ingester, watch monitor, hot-deal monitor, heartbeat sweep, and
    /// retention sweep as independent background tasks.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let group = |stage: &str| format!("{}-{stage}", self.config.consumer_group_id);

        let normalizer = Arc::new(Normalizer::new(self.bus.clone()));
        self.bus.subscribe(TOPIC_RAW_FEEDS, &group("normalizer"), normalizer);

        let scorer = Arc::new(Scorer::new(self.bus.clone(), self.store.clone(), self.config.scorer_min_score));
        self.bus.subscribe(TOPIC_NORMALIZED, &group("scorer"), scorer);

        let tagger = Arc::new(Tagger::new(self.bus.clone()));
        self.bus.subscribe(TOPIC_SCORED, &group("tagger"), tagger);

        let persister = Arc::new(
            Persister::new(self.bus.clone(), self.store.clone())
                .with_sink(self.session_hub.clone()),
        );
        self.bus.subscribe(TOPIC_TAGGED, &group("persister"), persister);

        let ingester = Arc::new(FeedIngester::new(self.bus.clone(), Arc::new(SeedListingsSource::new())));
        tokio::spawn(ingester.run(self.config.feed_ingestion_interval, self.shutdown_token.clone()));

        let watch_monitor = Arc::new(
            WatchMonitor::new(
                self.store.clone(),
                self.config.watch_realert_window,
                self.config.watch_alert_max_words,
            )
            .with_sink(self.session_hub.clone()),
        );
        tokio::spawn(watch_monitor.run(self.config.watch_check_interval, self.shutdown_token.clone()));

        let hot_deal_monitor = Arc::new(
            HotDealMonitor::new(
                self.store.clone(),
                self.config.hot_deal_savings_percent_threshold,
                self.config.hot_deal_discount_dollars_threshold,
                self.config.hot_deal_trending_every_n_ticks,
            )
            .with_sink(self.session_hub.clone()),
        );
        tokio::spawn(hot_deal_monitor.run(self.config.hot_deal_check_interval, self.shutdown_token.clone()));

        tokio::spawn(self.session_hub.clone().run_heartbeat_sweep(
            self.config.heartbeat_interval,
            self.shutdown_token.clone(),
        ));

        let store = self.store.clone();
        let retention_days = self.config.retention_days;
        let retention_interval = self.config.retention_sweep_interval;
        let cancel = self.shutdown_token.clone();
        tokio::spawn(async move {
            const BACKOFF_AFTER_FAILURE: std::time::Duration = std::time::Duration::from_secs(10);
            let mut ticker = tokio::time::interval(retention_interval);
            'outer: loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.sweep_retention(retention_days) {
                            Ok(sweep) => info!(
                                expired_deals = sweep.expired_deals,
                                pruned_history = sweep.pruned_history,
                                pruned_conversations = sweep.pruned_conversations,
                                pruned_plans = sweep.pruned_plans,
                                "retention sweep complete"
                            ),
                            Err(err) => {
                                tracing::warn!(error = %err, "retention sweep failed, backing off");
                                tokio::select! {
                                    _ = tokio::time::sleep(BACKOFF_AFTER_FAILURE) => {}
                                    _ = cancel.cancelled() => break 'outer,
                                }
                            }
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("retention sweep shutting down");
                        break;
                    }
                }
            }
        });

        info!("background tasks spawned");
    }

    pub fn shutdown(&self) {
        self.session_hub.broadcast(
            crate::session_hub::WsServerEvent::Notification {
                message: "server shutting down".to_string(),
            },
            &[],
        );
        self.shutdown.trigger();
    }
}
