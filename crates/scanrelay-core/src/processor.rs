//! Result processor: the per (event, binding) pipeline.
//!
//! parse → gate → dedup → render → aggregate-or-send, strictly in that order
//! and without retries. Every failure is contained to the job that hit it.

use std::sync::Arc;

use scanrelay_state::{PayloadDigest, ScanStore};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, Instrument};

use crate::aggregation::{bucket_key, FlushTask, SchedulerRegistry};
use crate::domain::content::{OWNERS, SRC};
use crate::domain::{Content, ProcessError, ScanRecord};
use crate::metrics::Metrics;
use crate::obs;
use crate::outputs::Output;
use crate::policy::PolicyGate;
use crate::routing::{AggregationPolicy, Job};
use crate::template::RenderContext;

/// Terminal state of one processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The route's rule rejected the event.
    NotMatched,
    /// Unchanged repeat on a route that hides repeats.
    Duplicate,
    /// A message went out; `aggregated` items were merged into it.
    Sent { aggregated: usize },
    /// Held in a count bucket below its threshold.
    Absorbed,
    /// Queued for the timed scheduler.
    Queued,
}

pub struct Processor {
    store: Arc<dyn ScanStore>,
    gate: Arc<dyn PolicyGate>,
    metrics: Arc<Metrics>,
    schedulers: Arc<SchedulerRegistry>,
    stop: watch::Receiver<bool>,
}

impl Processor {
    pub fn new(
        store: Arc<dyn ScanStore>,
        gate: Arc<dyn PolicyGate>,
        metrics: Arc<Metrics>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            gate,
            metrics,
            schedulers: Arc::new(SchedulerRegistry::new()),
            stop,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn schedulers(&self) -> &Arc<SchedulerRegistry> {
        &self.schedulers
    }

    /// Process `job` and log the outcome.
    pub async fn run(&self, job: Job) {
        let span = obs::event_span(&job.event_id, &job.route.name);
        match self.process(&job).instrument(span).await {
            Ok(ProcessOutcome::NotMatched) => {
                self.metrics.inc_not_matched();
                obs::emit_not_matched(&job.route.name, job.output.name());
            }
            Ok(ProcessOutcome::Duplicate) => self.metrics.inc_duplicates(),
            Ok(ProcessOutcome::Absorbed) | Ok(ProcessOutcome::Queued) => {
                self.metrics.inc_absorbed()
            }
            Ok(ProcessOutcome::Sent { .. }) => {}
            Err(e) => {
                self.metrics.inc_failures();
                obs::emit_process_failed(&job.route.name, job.output.name(), &e, &job.payload);
            }
        }
    }

    pub async fn process(&self, job: &Job) -> Result<ProcessOutcome, ProcessError> {
        let route = &job.route;
        let event: Value = serde_json::from_slice(&job.payload)?;

        if !self.gate.evaluate(&event, &route.rule).await? {
            return Ok(ProcessOutcome::NotMatched);
        }

        let scan = ScanRecord::from_value(&event)?;
        let unique_id = scan
            .unique_id()
            .unwrap_or_else(|| PayloadDigest::from_bytes(&job.payload).to_string());
        let key = bucket_key(&route.name, job.output.name());
        let record_key = dedup_key(&key, &unique_id);
        let lookup = self.store.lookup_and_record(&record_key, &job.payload).await?;
        if !lookup.is_new && !route.show_repeats {
            obs::emit_duplicate(&route.name, &record_key);
            return Ok(ProcessOutcome::Duplicate);
        }
        let previous: Option<Value> = match (&lookup.previous, lookup.is_new) {
            (Some(bytes), true) => serde_json::from_slice(bytes).ok(),
            _ => None,
        };

        let ctx = RenderContext {
            server_url: &job.server_url,
            layout: job.output.describe_layout_capability(),
            previous: previous.as_ref(),
        };
        let mut content = job.evaluator.eval(&event, &ctx)?;
        content.insert(SRC.to_string(), String::from_utf8_lossy(&job.payload).into_owned());
        if let Some(owners) = scan.owners() {
            content.insert(OWNERS.to_string(), owners);
        }

        let policy = if job.evaluator.is_aggregation_supported() {
            route.aggregation
        } else {
            AggregationPolicy::Immediate
        };

        let outcome = match policy {
            AggregationPolicy::Immediate => {
                self.send(job, &content, 1).await;
                ProcessOutcome::Sent { aggregated: 1 }
            }
            AggregationPolicy::Count(count) | AggregationPolicy::CountOrTimeout { count, .. } => {
                let batch = self.store.append_to_bucket(&key, content, count, false).await?;
                if batch.is_empty() {
                    debug!(bucket = %key, "item absorbed into bucket");
                    ProcessOutcome::Absorbed
                } else {
                    let ctx = RenderContext {
                        previous: None,
                        ..ctx
                    };
                    let merged = job.evaluator.build_aggregated_content(&batch, &ctx)?;
                    self.send(job, &merged, batch.len()).await;
                    ProcessOutcome::Sent {
                        aggregated: batch.len(),
                    }
                }
            }
            AggregationPolicy::Timeout(_) => {
                self.store.append_to_bucket(&key, content, 0, true).await?;
                ProcessOutcome::Queued
            }
        };

        if let Some(period) = policy.timeout() {
            self.ensure_scheduler(job, &key, period);
        }
        Ok(outcome)
    }

    /// Start the flush task for `key` unless one is already running.
    fn ensure_scheduler(&self, job: &Job, key: &str, period: std::time::Duration) {
        let Some(claim) = self.schedulers.try_claim(key) else {
            return;
        };
        let task = FlushTask {
            route: Arc::clone(&job.route),
            output: Arc::clone(&job.output),
            evaluator: Arc::clone(&job.evaluator),
            server_url: Arc::clone(&job.server_url),
            period,
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
        };
        task.spawn(claim, self.stop.clone());
    }

    async fn send(&self, job: &Job, content: &Content, aggregated: usize) {
        deliver(
            self.store.as_ref(),
            &self.metrics,
            &job.route.name,
            job.output.as_ref(),
            content,
            aggregated,
        )
        .await;
    }
}

/// Dedup records are kept per (route, output) binding, so every binding an
/// event fans out to sees it as new once.
pub fn dedup_key(binding: &str, unique_id: &str) -> String {
    format!("{binding}:{unique_id}")
}

/// Send `content` through `output`. Failures are logged, never propagated.
pub(crate) async fn deliver(
    store: &dyn ScanStore,
    metrics: &Metrics,
    route: &str,
    output: &dyn Output,
    content: &Content,
    aggregated: usize,
) -> bool {
    match output.send(content).await {
        Ok(()) => {
            metrics.inc_sent();
            obs::emit_sent(route, output.name(), aggregated);
            if let Err(e) = store.record_invocation(output.name()).await {
                tracing::warn!(output = %output.name(), error = %e, "failed to record invocation");
            }
            true
        }
        Err(e) => {
            metrics.inc_send_failures();
            obs::emit_send_failed(route, output.name(), &e);
            false
        }
    }
}
