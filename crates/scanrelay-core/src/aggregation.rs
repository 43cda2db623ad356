//! Aggregation buckets and the timed flush scheduler.
//!
//! Buckets are scoped per (route, output) pair so two outputs of one route
//! never merge each other's batches. At most one [`FlushTask`] runs per
//! bucket key; [`SchedulerRegistry`] hands out the claim that proves it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use scanrelay_state::ScanStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::outputs::Output;
use crate::processor::deliver;
use crate::routing::Route;
use crate::template::{ContentEvaluator, RenderContext};

/// Bucket key for a (route, output) pair.
pub fn bucket_key(route: &str, output: &str) -> String {
    format!("{route}/{output}")
}

/// Tracks which bucket keys have a running flush task.
#[derive(Debug, Default)]
pub struct SchedulerRegistry {
    running: Mutex<HashSet<String>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claim `key`, or `None` when a scheduler already holds it.
    pub fn try_claim(self: &Arc<Self>, key: &str) -> Option<SchedulerClaim> {
        if !self.lock().insert(key.to_string()) {
            return None;
        }
        Some(SchedulerClaim {
            registry: Arc::clone(self),
            key: key.to_string(),
        })
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    pub fn running_count(&self) -> usize {
        self.lock().len()
    }
}

/// Exclusive right to run the scheduler of one bucket key; released on drop.
#[derive(Debug)]
pub struct SchedulerClaim {
    registry: Arc<SchedulerRegistry>,
    key: String,
}

impl SchedulerClaim {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for SchedulerClaim {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// Periodic drain of one bucket through the binding that first scheduled it.
pub struct FlushTask {
    pub route: Arc<Route>,
    pub output: Arc<dyn Output>,
    pub evaluator: Arc<dyn ContentEvaluator>,
    pub server_url: Arc<str>,
    pub period: Duration,
    pub store: Arc<dyn ScanStore>,
    pub metrics: Arc<Metrics>,
}

impl FlushTask {
    pub fn spawn(self, claim: SchedulerClaim, stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(claim, stop))
    }

    async fn run(self, claim: SchedulerClaim, mut stop: watch::Receiver<bool>) {
        info!(
            bucket = %claim.key(),
            period_secs = self.period.as_secs(),
            "aggregation scheduler started"
        );
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush_once(claim.key()).await;
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(bucket = %claim.key(), "aggregation scheduler stopped");
    }

    /// Drain the bucket and deliver its merged content. Returns the number of
    /// items drained.
    pub async fn flush_once(&self, key: &str) -> usize {
        let batch = match self.store.drain_bucket(key).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(bucket = %key, error = %e, "bucket drain failed, skipping this round");
                return 0;
            }
        };
        if batch.is_empty() {
            debug!(bucket = %key, "nothing to flush");
            return 0;
        }

        let ctx = RenderContext {
            server_url: &self.server_url,
            layout: self.output.describe_layout_capability(),
            previous: None,
        };
        match self.evaluator.build_aggregated_content(&batch, &ctx) {
            Ok(content) => {
                deliver(
                    self.store.as_ref(),
                    &self.metrics,
                    &self.route.name,
                    self.output.as_ref(),
                    &content,
                    batch.len(),
                )
                .await;
            }
            Err(e) => {
                self.metrics.inc_failures();
                warn!(bucket = %key, error = %e, "failed to merge aggregated batch");
            }
        }
        batch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_route_and_output() {
        assert_eq!(bucket_key("route1", "slack"), "route1/slack");
    }

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let registry = Arc::new(SchedulerRegistry::new());
        let claim = registry.try_claim("r/o").unwrap();
        assert!(registry.try_claim("r/o").is_none());
        assert!(registry.is_running("r/o"));
        assert!(registry.try_claim("r/other").is_some());

        drop(claim);
        assert!(!registry.is_running("r/o"));
        assert!(registry.try_claim("r/o").is_some());
    }
}
