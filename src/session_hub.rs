//! Fan-out hub for live WebSocket sessions.
//!
//! One `broadcast` channel carries every event; each connected session
//! subscribes to it directly, exactly as the upstream websocket handler
//! subscribes to a single signal broadcaster. Targeted delivery (a single
//! user, or a room) rides the same channel with an envelope naming its
//! intended recipients; the per-session task filters on its own user id
//! rather than the hub holding a socket handle per session. On top of that
//! this hub tracks per-user liveness (last-seen heartbeat, consecutive send
//! failures, room membership, delivery counters) so the heartbeat sweep and
//! `/metrics` can report on sessions independent of whatever the socket
//! layer itself does.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::hot_deal_monitor::HotDealSink;
use crate::models::{Deal, PriceWatch};
use crate::pipeline::persister::DealEventSink;
use crate::watch_monitor::WatchAlertSink;

/// Frames pushed to clients. `deal_alert` carries its sub-type
/// (`new_deal` | `hot_deal` | `trending`) in `alert_type`; `trip_update`
/// carries the planning phase in `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerEvent {
    ConnectionEstablished {
        heartbeat_interval_secs: u64,
    },
    Notification {
        message: String,
    },
    DealAlert {
        alert_type: String,
        deal: Deal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        watch_count: Option<i64>,
    },
    PriceAlert {
        watch_id: String,
        deal: Deal,
        reasons: Vec<String>,
        summary: String,
    },
    TripUpdate {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan_id: Option<String>,
    },
    Heartbeat {
        timestamp: i64,
    },
    Pong {
        timestamp: i64,
    },
    Stats {
        connected_sessions: usize,
        sent: u64,
        received: u64,
        failed: u64,
        queued: u64,
    },
    Ack {
        for_type: String,
    },
}

/// An event plus its intended recipients. `targets: None` means everyone;
/// `Some(set)` restricts delivery to those user ids (a single-user address
/// or a room's membership); `exclude` removes specific users from either.
#[derive(Clone)]
struct Envelope {
    targets: Option<HashSet<String>>,
    exclude: HashSet<String>,
    event: WsServerEvent,
}

impl Envelope {
    fn is_for(&self, user_id: &str) -> bool {
        if self.exclude.contains(user_id) {
            return false;
        }
        match &self.targets {
            None => true,
            Some(targets) => targets.contains(user_id),
        }
    }
}

#[derive(Default)]
struct SessionStats {
    sent: u64,
    received: u64,
    failed: u64,
    queued: u64,
}

struct SessionState {
    last_seen: DateTime<Utc>,
    consecutive_failures: u32,
    rooms: HashSet<String>,
    stats: SessionStats,
}

impl SessionState {
    fn new() -> Self {
        Self {
            last_seen: Utc::now(),
            consecutive_failures: 0,
            rooms: HashSet::new(),
            stats: SessionStats::default(),
        }
    }
}

const BROADCAST_CAPACITY: usize = 1024;
const MIN_SESSION_QUEUE: usize = 16;

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub sent: u64,
    pub received: u64,
    pub failed: u64,
    pub queued: u64,
}

#[derive(Debug, Serialize)]
pub struct HubStats {
    pub connected_sessions: usize,
    pub total_sent: u64,
    pub total_received: u64,
    pub total_failed: u64,
    pub total_queued: u64,
    pub per_user: HashMap<String, UserStats>,
}

pub struct SessionHub {
    broadcast_tx: broadcast::Sender<Envelope>,
    sessions: Mutex<HashMap<String, SessionState>>,
    stale_timeout: Duration,
    heartbeat_interval: Duration,
    max_consecutive_failures: u32,
    max_queued_messages: usize,
    total_sent: AtomicU64,
    total_received: AtomicU64,
    total_failed: AtomicU64,
    total_queued: AtomicU64,
}

impl SessionHub {
    pub fn new(
        stale_timeout: Duration,
        heartbeat_interval: Duration,
        max_consecutive_failures: u32,
        max_queued_messages: usize,
    ) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            broadcast_tx,
            sessions: Mutex::new(HashMap::new()),
            stale_timeout,
            heartbeat_interval,
            max_consecutive_failures,
            max_queued_messages: max_queued_messages.max(MIN_SESSION_QUEUE),
            total_sent: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_queued: AtomicU64::new(0),
        }
    }

    fn subscribe_raw(&self) -> broadcast::Receiver<Envelope> {
        self.broadcast_tx.subscribe()
    }

    /// Accepts a new session, recording it and returning the welcome frame
    /// the transport should send immediately (it advertises the heartbeat
    /// interval so the client knows how long to wait before worrying).
    pub fn connect(&self, user_id: &str) -> (broadcast::Receiver<WsServerEvent>, WsServerEvent) {
        self.sessions.lock().entry(user_id.to_string()).or_insert_with(SessionState::new);
        let rx = self.subscribe_raw();
        let welcome = WsServerEvent::ConnectionEstablished {
            heartbeat_interval_secs: self.heartbeat_interval.as_secs(),
        };
        (
            filtered_receiver(rx, user_id.to_string(), self.max_queued_messages),
            welcome,
        )
    }

    pub fn disconnect(&self, user_id: &str) {
        self.drop_session(user_id);
    }

    pub fn touch(&self, user_id: &str) {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(user_id.to_string())
            .and_modify(|s| {
                s.last_seen = Utc::now();
                s.consecutive_failures = 0;
                s.stats.received += 1;
            })
            .or_insert_with(SessionState::new);
        self.total_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Best-effort delivery to one user. `queue_on_failure` mirrors the
    /// upstream hub's flag; the broadcast channel's own bounded buffer acts
    /// as the queue (a lagged receiver simply misses the oldest entries),
    /// so this only affects whether the publish is attempted at all.
    pub fn send_to_user(&self, user_id: &str, event: WsServerEvent, queue_on_failure: bool) {
        if !self.sessions.lock().contains_key(user_id) && !queue_on_failure {
            return;
        }
        let envelope = Envelope {
            targets: Some(HashSet::from([user_id.to_string()])),
            exclude: HashSet::new(),
            event,
        };
        self.publish(envelope, &[user_id.to_string()]);
    }

    pub fn broadcast(&self, event: WsServerEvent, exclude: &[String]) {
        let targets: Vec<String> = self.sessions.lock().keys().cloned().collect();
        let envelope = Envelope {
            targets: None,
            exclude: exclude.iter().cloned().collect(),
            event,
        };
        self.publish(envelope, &targets);
    }

    pub fn join_room(&self, user_id: &str, room: &str) {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(user_id.to_string())
            .or_insert_with(SessionState::new)
            .rooms
            .insert(room.to_string());
    }

    pub fn leave_room(&self, user_id: &str, room: &str) {
        if let Some(state) = self.sessions.lock().get_mut(user_id) {
            state.rooms.remove(room);
        }
    }

    pub fn broadcast_to_room(&self, room: &str, event: WsServerEvent) {
        let members: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, state)| state.rooms.contains(room))
            .map(|(user_id, _)| user_id.clone())
            .collect();
        if members.is_empty() {
            return;
        }
        let envelope = Envelope {
            targets: Some(members.iter().cloned().collect()),
            exclude: HashSet::new(),
            event,
        };
        self.publish(envelope, &members);
    }

    fn publish(&self, envelope: Envelope, recipients: &[String]) {
        let count = recipients.len() as u64;
        {
            let mut sessions = self.sessions.lock();
            for user_id in recipients {
                if let Some(state) = sessions.get_mut(user_id) {
                    state.stats.sent += 1;
                }
            }
        }
        self.total_sent.fetch_add(count, Ordering::Relaxed);
        // No receivers is the common case between connections; the error
        // carries the envelope back, which we intentionally drop.
        let _ = self.broadcast_tx.send(envelope);
    }

    /// Records a failed send for `user_id`; returns true once the failure
    /// count has crossed the configured threshold, meaning the caller
    /// should drop the connection rather than keep retrying it.
    pub fn record_failure(&self, user_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let state = sessions.entry(user_id.to_string()).or_insert_with(SessionState::new);
        state.consecutive_failures += 1;
        state.stats.failed += 1;
        state.stats.queued += 1;
        self.total_failed.fetch_add(1, Ordering::Relaxed);
        self.total_queued.fetch_add(1, Ordering::Relaxed);
        state.consecutive_failures >= self.max_consecutive_failures
    }

    pub fn drop_session(&self, user_id: &str) {
        self.sessions.lock().remove(user_id);
    }

    pub fn stats(&self) -> HubStats {
        let sessions = self.sessions.lock();
        let per_user = sessions
            .iter()
            .map(|(user_id, state)| {
                (
                    user_id.clone(),
                    UserStats {
                        sent: state.stats.sent,
                        received: state.stats.received,
                        failed: state.stats.failed,
                        queued: state.stats.queued,
                    },
                )
            })
            .collect();
        HubStats {
            connected_sessions: sessions.len(),
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_received: self.total_received.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_queued: self.total_queued.load(Ordering::Relaxed),
            per_user,
        }
    }

    /// Removes sessions that haven't sent a heartbeat within the stale
    /// timeout. Returns how many were dropped.
    pub fn sweep_stale(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let cutoff = Utc::now() - chrono::Duration::from_std(self.stale_timeout).unwrap_or_default();
        let before = sessions.len();
        sessions.retain(|_, state| state.last_seen >= cutoff);
        before - sessions.len()
    }

    pub async fn run_heartbeat_sweep(self: Arc<Self>, interval: Duration, cancel: crate::shutdown::ShutdownToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let dropped = self.sweep_stale();
                    if dropped > 0 {
                        info!(dropped, "heartbeat sweep dropped stale sessions");
                    }
                    self.broadcast(WsServerEvent::Heartbeat { timestamp: Utc::now().timestamp() }, &[]);
                }
                _ = cancel.cancelled() => {
                    info!("session heartbeat sweep shutting down");
                    break;
                }
            }
        }
    }
}

/// Adapts a raw envelope receiver into a plain event receiver scoped to one
/// user by re-publishing matching events onto a private per-session channel.
/// The per-session channel is bounded to the configured undelivered-message
/// queue depth: a session that stops draining loses the oldest entries
/// rather than growing without bound.
fn filtered_receiver(
    mut raw: broadcast::Receiver<Envelope>,
    user_id: String,
    queue_depth: usize,
) -> broadcast::Receiver<WsServerEvent> {
    let (tx, rx) = broadcast::channel(queue_depth);
    tokio::spawn(async move {
        loop {
            match raw.recv().await {
                Ok(envelope) => {
                    if envelope.is_for(&user_id) {
                        let _ = tx.send(envelope.event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    rx
}

impl DealEventSink for SessionHub {
    fn on_new_deal(&self, deal: &Deal) {
        self.broadcast(
            WsServerEvent::DealAlert {
                alert_type: "new_deal".to_string(),
                deal: deal.clone(),
                watch_count: None,
            },
            &[],
        );
    }
}

impl WatchAlertSink for SessionHub {
    fn on_watch_alert(&self, watch: &PriceWatch, deal: &Deal, reasons: &[String], summary: &str) {
        self.send_to_user(
            &watch.user_id,
            WsServerEvent::PriceAlert {
                watch_id: watch.watch_id.clone(),
                deal: deal.clone(),
                reasons: reasons.to_vec(),
                summary: summary.to_string(),
            },
            true,
        );
    }
}

impl HotDealSink for SessionHub {
    fn on_hot_deal(&self, deal: &Deal) {
        self.broadcast(
            WsServerEvent::DealAlert {
                alert_type: "hot_deal".to_string(),
                deal: deal.clone(),
                watch_count: None,
            },
            &[],
        );
    }

    fn on_trending_deal(&self, deal: &Deal, watch_count: i64) {
        self.broadcast(
            WsServerEvent::DealAlert {
                alert_type: "trending".to_string(),
                deal: deal.clone(),
                watch_count: Some(watch_count),
            },
            &[],
        );
    }
}
