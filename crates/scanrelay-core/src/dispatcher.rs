//! Dispatcher: owns the live configuration snapshot and the background loops.
//!
//! ## Lifecycle
//!
//! - `start` reads the source, has the gate validate every route rule, builds
//!   a snapshot and starts the consumer loop plus the maintenance timer when
//!   retention limits are configured.
//! - `reload` builds the replacement snapshot first. If that fails the old
//!   configuration keeps serving. Otherwise the new snapshot is published in a
//!   single swap, the old consumer drains what is already queued with the old
//!   snapshot, and the old outputs are terminated once its jobs finish.
//! - `terminate` stops the loops and terminates every output. Calling it
//!   again is a no-op.
//!
//! The consumer loop only hands payloads to the router; every latency-bearing
//! step runs in the spawned processor tasks.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use scanrelay_state::ScanStore;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, ConfigSource};
use crate::domain::{ConfigError, RelayError, Result};
use crate::maintenance::MaintenanceTask;
use crate::metrics::Metrics;
use crate::obs;
use crate::outputs::{BuiltinOutputs, OutputFactory};
use crate::policy::{sanitize, PolicyGate, RuleGate};
use crate::processor::Processor;
use crate::routing::{dispatch, dispatch_all, DispatchHandle};
use crate::snapshot::Snapshot;
use crate::template::{PlaceholderEngine, TemplateEngine};

/// Collaborators a dispatcher is built from.
#[derive(Clone)]
pub struct DispatcherDeps {
    pub store: Arc<dyn ScanStore>,
    pub gate: Arc<dyn PolicyGate>,
    pub engine: Arc<dyn TemplateEngine>,
    pub outputs: Arc<dyn OutputFactory>,
    pub http: reqwest::Client,
}

impl DispatcherDeps {
    /// Built-in gate, template engine and output kinds over `store`.
    pub fn builtin(store: Arc<dyn ScanStore>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(format!("scanrelay/{}", crate::VERSION))
            .build()
            .unwrap_or_default();
        Self {
            store,
            gate: Arc::new(RuleGate::new()),
            engine: Arc::new(PlaceholderEngine),
            outputs: Arc::new(BuiltinOutputs::new(http.clone())),
            http,
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn PolicyGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_outputs(mut self, outputs: Arc<dyn OutputFactory>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

/// What readers see: one snapshot and the queue feeding its consumer.
struct Active {
    snapshot: Arc<Snapshot>,
    processor: Arc<Processor>,
    queue: mpsc::Sender<Vec<u8>>,
}

/// Background loops of the active snapshot.
struct Running {
    stop: watch::Sender<bool>,
    consumer: JoinHandle<()>,
    maintenance: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Lifecycle {
    source: Option<ConfigSource>,
    running: Option<Running>,
}

pub struct Dispatcher {
    deps: DispatcherDeps,
    metrics: Arc<Metrics>,
    active: ArcSwapOption<Active>,
    lifecycle: Mutex<Lifecycle>,
}

impl Dispatcher {
    pub fn new(deps: DispatcherDeps) -> Self {
        Self {
            deps,
            metrics: Arc::new(Metrics::new()),
            active: ArcSwapOption::empty(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Currently published snapshot, if running.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.active.load_full().map(|a| Arc::clone(&a.snapshot))
    }

    /// Flush tasks currently running for the active snapshot.
    pub fn running_schedulers(&self) -> usize {
        self.active
            .load_full()
            .map(|a| a.processor.schedulers().running_count())
            .unwrap_or(0)
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.running.is_some()
    }

    pub async fn start(&self, source: ConfigSource) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            return Err(RelayError::AlreadyRunning);
        }
        let snapshot = self.load(&source).await?;
        let (active, running) = self.launch(snapshot);
        if let Some(stale) = self.active.swap(Some(active)) {
            stale.snapshot.terminate_outputs().await;
        }
        info!(source = %source, "dispatcher started");
        lifecycle.source = Some(source);
        lifecycle.running = Some(running);
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(source) = lifecycle.source.clone() else {
            return Err(RelayError::NotStarted);
        };
        let snapshot = match self.load(&source).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(source = %source, error = %e, "reload failed, keeping current configuration");
                return Err(e);
            }
        };

        // publish first so submits land on the new queue while the old one drains
        let (active, running) = self.launch(snapshot);
        let old = self.active.swap(Some(active));
        if let Some(stale) = lifecycle.running.replace(running) {
            stop_loops(stale).await;
        }
        if let Some(old) = old {
            old.snapshot.terminate_outputs().await;
        }
        info!(source = %source, "dispatcher reloaded");
        Ok(())
    }

    pub async fn terminate(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(running) = lifecycle.running.take() else {
            info!("dispatcher is not running, terminate ignored");
            return;
        };
        stop_loops(running).await;
        if let Some(old) = self.active.swap(None) {
            old.snapshot.terminate_outputs().await;
        }
        self.metrics.flush();
        info!("dispatcher terminated");
    }

    /// Queue a raw payload for every route. Waits while the queue is full.
    pub async fn submit(&self, payload: &[u8]) -> Result<()> {
        let mut payload = sanitize(payload, self.deps.gate.reserved_characters());
        // a reload may close the queue we picked; retry once on its successor
        for _ in 0..2 {
            let active = self.active.load_full().ok_or(RelayError::NotStarted)?;
            match active.queue.send(payload).await {
                Ok(()) => {
                    self.metrics.inc_received();
                    return Ok(());
                }
                Err(mpsc::error::SendError(returned)) => payload = returned,
            }
        }
        Err(RelayError::QueueClosed)
    }

    /// Dispatch a raw payload straight to one route, bypassing the queue.
    pub async fn submit_to_route(&self, route: &str, payload: &[u8]) -> Result<DispatchHandle> {
        let active = self.active.load_full().ok_or(RelayError::NotStarted)?;
        let payload: Arc<[u8]> = sanitize(payload, self.deps.gate.reserved_characters()).into();
        let event_id = Uuid::new_v4();
        self.metrics.inc_received();
        obs::emit_event_submitted(&event_id, payload.len());
        Ok(dispatch(
            &active.snapshot,
            &active.processor,
            route,
            payload,
            event_id,
        ))
    }

    async fn load(&self, source: &ConfigSource) -> Result<Snapshot> {
        let config: Config = source.read().await?;
        for route in &config.routes {
            self.deps
                .gate
                .validate(&route.input)
                .map_err(|e| ConfigError::Route {
                    route: route.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        let snapshot = Snapshot::build(
            &config,
            self.deps.engine.as_ref(),
            self.deps.outputs.as_ref(),
            &self.deps.http,
        )
        .await?;
        Ok(snapshot)
    }

    fn launch(&self, snapshot: Snapshot) -> (Arc<Active>, Running) {
        let (stop, stop_rx) = watch::channel(false);
        let snapshot = Arc::new(snapshot);
        let processor = Arc::new(Processor::new(
            Arc::clone(&self.deps.store),
            Arc::clone(&self.deps.gate),
            Arc::clone(&self.metrics),
            stop_rx.clone(),
        ));
        let (queue, rx) = mpsc::channel(snapshot.queue_capacity());

        let consumer = tokio::spawn(consume(
            Arc::clone(&snapshot),
            Arc::clone(&processor),
            rx,
            stop_rx.clone(),
        ));
        let maintenance = MaintenanceTask::new(
            Arc::clone(&self.deps.store),
            snapshot.retention(),
            snapshot.maintenance_interval(),
        )
        .spawn(stop_rx);

        let active = Arc::new(Active {
            snapshot,
            processor,
            queue,
        });
        (
            active,
            Running {
                stop,
                consumer,
                maintenance,
            },
        )
    }
}

async fn stop_loops(running: Running) {
    let _ = running.stop.send(true);
    if let Err(e) = running.consumer.await {
        warn!(error = %e, "consumer loop panicked");
    }
    if let Some(maintenance) = running.maintenance {
        if let Err(e) = maintenance.await {
            warn!(error = %e, "maintenance timer panicked");
        }
    }
}

fn route_payload(snapshot: &Arc<Snapshot>, processor: &Arc<Processor>, payload: Vec<u8>) -> DispatchHandle {
    let event_id = Uuid::new_v4();
    obs::emit_event_submitted(&event_id, payload.len());
    dispatch_all(snapshot, processor, payload.into(), event_id)
}

/// Hand queued payloads to the router until stopped, then drain what is left
/// and wait for every job routed by this loop.
async fn consume(
    snapshot: Arc<Snapshot>,
    processor: Arc<Processor>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut stop: watch::Receiver<bool>,
) {
    let mut in_flight: Vec<DispatchHandle> = Vec::new();
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            message = rx.recv() => match message {
                Some(payload) => {
                    in_flight.retain(|h| !h.is_finished());
                    in_flight.push(route_payload(&snapshot, &processor, payload));
                }
                None => break,
            },
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(payload) = rx.recv().await {
        in_flight.push(route_payload(&snapshot, &processor, payload));
        drained += 1;
    }
    if drained > 0 {
        info!(events = drained, "drained queued events on stop");
    }
    for handle in in_flight {
        handle.join().await;
    }
}
