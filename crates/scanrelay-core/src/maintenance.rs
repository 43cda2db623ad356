//! Periodic retention enforcement against the store.

use std::sync::Arc;
use std::time::Duration;

use scanrelay_state::{RetentionLimits, ScanStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct MaintenanceTask {
    store: Arc<dyn ScanStore>,
    limits: RetentionLimits,
    period: Duration,
}

impl MaintenanceTask {
    pub fn new(store: Arc<dyn ScanStore>, limits: RetentionLimits, period: Duration) -> Self {
        Self {
            store,
            limits,
            period,
        }
    }

    /// Spawn the timer, or `None` when no limit is configured.
    pub fn spawn(self, stop: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.limits.is_enabled() {
            debug!("no retention limits configured, maintenance timer not started");
            return None;
        }
        Some(tokio::spawn(self.run(stop)))
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(period_secs = self.period.as_secs(), "maintenance timer started");
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("maintenance timer stopped");
    }

    /// Apply both limits once. Returns the number of evicted records.
    pub async fn run_once(&self) -> usize {
        let mut evicted = 0;
        if let Some(limit) = self.limits.max_size_bytes {
            match self.store.enforce_size_limit(limit).await {
                Ok(n) => evicted += n,
                Err(e) => warn!(error = %e, "size limit enforcement failed"),
            }
        }
        if let Some(max_age) = self.limits.max_age {
            match self.store.enforce_age_limit(max_age).await {
                Ok(n) => evicted += n,
                Err(e) => warn!(error = %e, "age limit enforcement failed"),
            }
        }
        if evicted > 0 {
            info!(evicted, "retention limits enforced");
        }
        evicted
    }
}
