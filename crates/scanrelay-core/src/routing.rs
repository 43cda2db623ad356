//! Routing table model and fan-out of one payload to its (route, output) jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RouteSettings;
use crate::obs;
use crate::outputs::Output;
use crate::processor::Processor;
use crate::snapshot::Snapshot;
use crate::template::ContentEvaluator;

/// How rendered content is batched before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    Immediate,
    /// Deliver one merged message every `n` items.
    Count(usize),
    /// Queue everything; a scheduler flushes on the interval.
    Timeout(Duration),
    /// Count threshold plus a periodic flush of partial batches.
    CountOrTimeout { count: usize, timeout: Duration },
}

impl AggregationPolicy {
    /// Select the policy from which settings are non-zero.
    pub fn from_settings(count: usize, timeout_seconds: u64) -> Self {
        match (count, timeout_seconds) {
            (0, 0) => AggregationPolicy::Immediate,
            (n, 0) => AggregationPolicy::Count(n),
            (0, s) => AggregationPolicy::Timeout(Duration::from_secs(s)),
            (n, s) => AggregationPolicy::CountOrTimeout {
                count: n,
                timeout: Duration::from_secs(s),
            },
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self {
            AggregationPolicy::Timeout(t) | AggregationPolicy::CountOrTimeout { timeout: t, .. } => {
                Some(*t)
            }
            _ => None,
        }
    }

    pub fn count(&self) -> Option<usize> {
        match self {
            AggregationPolicy::Count(n) | AggregationPolicy::CountOrTimeout { count: n, .. } => {
                Some(*n)
            }
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, AggregationPolicy::Immediate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    /// Policy rule text handed to the gate.
    pub rule: String,
    pub template: String,
    pub outputs: Vec<String>,
    pub aggregation: AggregationPolicy,
    /// Deliver repeats of unchanged scans.
    pub show_repeats: bool,
}

impl Route {
    pub fn from_settings(settings: &RouteSettings) -> Self {
        Self {
            name: settings.name.clone(),
            rule: settings.input.clone(),
            template: settings.template.clone(),
            outputs: settings.outputs.clone(),
            aggregation: AggregationPolicy::from_settings(
                settings.plugins.aggregate_issues_number,
                settings.plugins.aggregate_timeout_seconds,
            ),
            show_repeats: settings.plugins.policy_show_all,
        }
    }
}

/// One resolved (route, output, evaluator) unit of work for a payload.
#[derive(Clone)]
pub struct Job {
    pub route: Arc<Route>,
    pub output: Arc<dyn Output>,
    pub evaluator: Arc<dyn ContentEvaluator>,
    pub payload: Arc<[u8]>,
    pub server_url: Arc<str>,
    pub event_id: Uuid,
}

/// Tasks spawned for one dispatch. Dropping the handle detaches them.
#[derive(Debug, Default)]
pub struct DispatchHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl DispatchHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `true` once every spawned task has completed.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    fn extend(&mut self, other: DispatchHandle) {
        self.tasks.extend(other.tasks);
    }

    /// Wait for every spawned processor task to finish.
    pub async fn join(self) {
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "processor task panicked");
            }
        }
    }
}

/// Resolve the bindings of `route_name` and spawn one processor task per
/// resolved pair. Misses are logged and skipped.
pub fn dispatch(
    snapshot: &Arc<Snapshot>,
    processor: &Arc<Processor>,
    route_name: &str,
    payload: Arc<[u8]>,
    event_id: Uuid,
) -> DispatchHandle {
    let mut handle = DispatchHandle::default();

    let Some(route) = snapshot.route(route_name) else {
        obs::emit_route_missing(route_name);
        return handle;
    };
    if route.outputs.is_empty() {
        tracing::info!(route = %route.name, "route has no outputs, nothing to dispatch");
        return handle;
    }

    for output_name in &route.outputs {
        let Some(output) = snapshot.output(output_name) else {
            obs::emit_binding_skipped(&route.name, output_name, "output is not configured or disabled");
            continue;
        };
        let Some(evaluator) = snapshot.evaluator(&route.template) else {
            obs::emit_binding_skipped(&route.name, output_name, "template is not configured");
            continue;
        };

        let job = Job {
            route: Arc::clone(route),
            output: Arc::clone(output),
            evaluator: Arc::clone(evaluator),
            payload: Arc::clone(&payload),
            server_url: snapshot.server_url(),
            event_id,
        };
        let permits = snapshot.permits();
        let processor = Arc::clone(processor);
        handle.tasks.push(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            processor.run(job).await;
        }));
    }
    processor.metrics().add_dispatched(handle.len());
    handle
}

/// Dispatch `payload` to every route in the table.
pub fn dispatch_all(
    snapshot: &Arc<Snapshot>,
    processor: &Arc<Processor>,
    payload: Arc<[u8]>,
    event_id: Uuid,
) -> DispatchHandle {
    let mut handle = DispatchHandle::default();
    for route in snapshot.routes() {
        handle.extend(dispatch(
            snapshot,
            processor,
            &route.name,
            Arc::clone(&payload),
            event_id,
        ));
    }
    handle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_selected_from_non_zero_settings() {
        assert_eq!(AggregationPolicy::from_settings(0, 0), AggregationPolicy::Immediate);
        assert_eq!(AggregationPolicy::from_settings(3, 0), AggregationPolicy::Count(3));
        assert_eq!(
            AggregationPolicy::from_settings(0, 30),
            AggregationPolicy::Timeout(Duration::from_secs(30))
        );
        let both = AggregationPolicy::from_settings(5, 10);
        assert_eq!(both.count(), Some(5));
        assert_eq!(both.timeout(), Some(Duration::from_secs(10)));
        assert!(!both.is_immediate());
    }

    #[test]
    fn route_from_settings() {
        let mut settings = RouteSettings {
            name: "r".into(),
            input: "registry == 'x'".into(),
            outputs: vec!["a".into()],
            template: "t".into(),
            ..Default::default()
        };
        settings.plugins.policy_show_all = true;
        settings.plugins.aggregate_issues_number = 2;
        let route = Route::from_settings(&settings);
        assert_eq!(route.rule, "registry == 'x'");
        assert!(route.show_repeats);
        assert_eq!(route.aggregation, AggregationPolicy::Count(2));
    }
}
