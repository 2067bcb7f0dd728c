//! Client-side ETA tracking for one order.
//!
//! An `EtaTracker` holds the latest snapshot, adopts pushed order changes,
//! polls as a safety net and never surfaces an error: every failure ends as
//! an unknown (`None`) ETA plus a log line.

pub mod client;
pub mod push;
pub mod strategy;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::eta::EtaSnapshot;
use crate::models::geo::GeoPoint;
use crate::models::order::{ChangeKind, OrderChange};
use crate::tracker::client::{CalculatorClient, EtaReader};
use crate::tracker::push::{ChangeSource, ChangeStream};
use crate::tracker::strategy::{
    EtaStrategy, RemoteCalculation, StoredEtaRead, StrategyError, first_success,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&Config> for TrackerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
        }
    }
}

/// Remote calculation first, stored value second.
pub fn default_strategies(
    calculator: Arc<dyn CalculatorClient>,
    reader: Arc<dyn EtaReader>,
) -> Vec<Arc<dyn EtaStrategy>> {
    vec![
        Arc::new(RemoteCalculation::new(calculator)),
        Arc::new(StoredEtaRead::new(reader)),
    ]
}

struct Resolver {
    strategies: Vec<Arc<dyn EtaStrategy>>,
    snapshot: watch::Sender<Option<EtaSnapshot>>,
}

impl Resolver {
    async fn refresh(&self, order_id: Uuid, courier: Option<GeoPoint>) {
        match first_success(&self.strategies, order_id, courier).await {
            Ok(resolution) => {
                debug!(
                    order_id = %order_id,
                    strategy = resolution.strategy,
                    known = resolution.snapshot.is_some(),
                    "eta refreshed"
                );
                self.snapshot.send_replace(resolution.snapshot);
            }
            Err(attempts) => {
                for attempt in &attempts {
                    match &attempt.error {
                        StrategyError::Skipped(reason) => {
                            debug!(order_id = %order_id, strategy = attempt.strategy, reason, "eta strategy skipped");
                        }
                        StrategyError::Failed(reason) => {
                            warn!(order_id = %order_id, strategy = attempt.strategy, error = %reason, "eta strategy failed");
                        }
                    }
                }
                error!(order_id = %order_id, attempts = attempts.len(), "eta unavailable");
                self.snapshot.send_replace(None);
            }
        }
    }

    /// Pushed values win immediately; distance and route carry over when the
    /// change does not include them.
    fn adopt(&self, change: &OrderChange) {
        if change.kind != ChangeKind::EtaUpdated {
            return;
        }
        let Some(eta_minutes) = change.eta_minutes else {
            return;
        };

        self.snapshot.send_modify(|current| {
            let held = current.take();
            let distance_miles = change
                .distance_miles
                .or_else(|| held.as_ref().map(|snapshot| snapshot.distance_miles))
                .unwrap_or(0.0);

            *current = Some(EtaSnapshot {
                eta_minutes,
                distance_miles,
                last_updated: change.eta_updated_at.unwrap_or_else(Utc::now),
                route: held.and_then(|snapshot| snapshot.route),
            });
        });
        debug!(order_id = %change.order_id, eta_minutes, "eta pushed");
    }
}

pub struct EtaTracker {
    order_id: Option<Uuid>,
    resolver: Arc<Resolver>,
    changes: Arc<dyn ChangeSource>,
    config: TrackerConfig,
    task: Option<JoinHandle<()>>,
}

impl EtaTracker {
    /// Starts tracking `order_id`. Must be called inside a tokio runtime.
    /// Without an order id nothing is subscribed or polled. `changes` is
    /// either the in-process `ChangeFeed` or a `WebSocketChanges`.
    pub fn mount(
        order_id: Option<Uuid>,
        strategies: Vec<Arc<dyn EtaStrategy>>,
        changes: impl ChangeSource,
        config: TrackerConfig,
    ) -> Self {
        let (snapshot, _unused_rx) = watch::channel(None);
        let mut tracker = Self {
            order_id,
            resolver: Arc::new(Resolver {
                strategies,
                snapshot,
            }),
            changes: Arc::new(changes),
            config,
            task: None,
        };
        tracker.start();
        tracker
    }

    fn start(&mut self) {
        let Some(order_id) = self.order_id else {
            return;
        };

        let changes = self.changes.open(order_id);
        let poll_interval = self.config.poll_interval.max(Duration::from_millis(1));
        self.task = Some(tokio::spawn(run(
            self.resolver.clone(),
            order_id,
            changes,
            poll_interval,
        )));
    }

    pub fn order_id(&self) -> Option<Uuid> {
        self.order_id
    }

    /// Requests a fresh ETA. Never fails; see the module docs.
    pub async fn calculate_eta(&self, courier: Option<GeoPoint>) {
        let Some(order_id) = self.order_id else {
            debug!("calculate_eta called without an order id");
            return;
        };
        self.resolver.refresh(order_id, courier).await;
    }

    pub fn snapshot(&self) -> Option<EtaSnapshot> {
        self.resolver.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<EtaSnapshot>> {
        self.resolver.snapshot.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Switches to another order, tearing down the old subscription and timer first.
    pub async fn set_order(&mut self, order_id: Option<Uuid>) {
        if self.order_id == order_id && self.is_active() {
            return;
        }
        self.unmount().await;
        self.order_id = order_id;
        self.start();
    }

    /// Stops push handling and polling and discards the snapshot. When this
    /// returns the subscription and the timer are gone.
    pub async fn unmount(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.resolver.snapshot.send_replace(None);
    }
}

impl Drop for EtaTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    resolver: Arc<Resolver>,
    order_id: Uuid,
    mut changes: Box<dyn ChangeStream>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut push_open = true;

    loop {
        tokio::select! {
            change = changes.next_change(), if push_open => match change {
                Some(change) => resolver.adopt(&change),
                None => {
                    warn!(order_id = %order_id, "order change stream closed; polling only");
                    push_open = false;
                }
            },
            _ = ticker.tick() => resolver.refresh(order_id, None).await,
        }
    }
}
