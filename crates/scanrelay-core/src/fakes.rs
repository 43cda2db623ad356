//! In-memory fakes for the core's collaborator traits (testing only)
//!
//! Provides `RecordingOutput`/`RecordingOutputs`, fixed-answer gates and a
//! store that fails every call.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use scanrelay_state::{BucketItem, LookupOutcome, ScanStore, StorageError, StorageResult};
use serde_json::Value;
use tokio::sync::watch;

use crate::config::OutputSettings;
use crate::domain::{ConfigError, Content, GateError, SendError};
use crate::layout::Layout;
use crate::outputs::{Output, OutputFactory, OutputKind};
use crate::policy::PolicyGate;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// RecordingOutput
// ---------------------------------------------------------------------------

/// Output that keeps every message it is asked to send.
pub struct RecordingOutput {
    name: String,
    kind: OutputKind,
    layout: Layout,
    sent: Mutex<Vec<Content>>,
    count: watch::Sender<usize>,
    fail_init: bool,
    fail_send: AtomicBool,
    send_delay: Option<Duration>,
    initialised: AtomicBool,
    terminated: AtomicBool,
}

impl RecordingOutput {
    pub fn new(name: &str, layout: Layout) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            name: name.to_string(),
            kind: OutputKind::Webhook,
            layout,
            sent: Mutex::new(Vec::new()),
            count,
            fail_init: false,
            fail_send: AtomicBool::new(false),
            send_delay: None,
            initialised: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn with_kind(mut self, kind: OutputKind) -> Self {
        self.kind = kind;
        self
    }

    /// Make `init` fail.
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Hold every send for `delay` before recording it.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Make subsequent sends fail (they are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.fail_send.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Content> {
        lock(&self.sent).clone()
    }

    pub fn sent_count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` messages were sent. `false` on timeout.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|count| *count >= n))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Output for RecordingOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        self.kind
    }

    fn describe_layout_capability(&self) -> Layout {
        self.layout
    }

    async fn init(&self) -> Result<(), SendError> {
        if self.fail_init {
            return Err(SendError::Transport {
                output: self.name.clone(),
                reason: "init refused".to_string(),
            });
        }
        self.initialised.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, content: &Content) -> Result<(), SendError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        let len = {
            let mut sent = lock(&self.sent);
            sent.push(content.clone());
            sent.len()
        };
        self.count.send_replace(len);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(SendError::Rejected {
                output: self.name.clone(),
                status: 500,
            });
        }
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SendError> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingOutputs
// ---------------------------------------------------------------------------

/// Factory building a [`RecordingOutput`] per `[[output]]` table.
///
/// The layout follows the configured `type` the way the built-in kinds do.
/// `url = "fail-init"` yields an output whose `init` fails.
#[derive(Default)]
pub struct RecordingOutputs {
    latest: Mutex<HashMap<String, Arc<RecordingOutput>>>,
    history: Mutex<Vec<Arc<RecordingOutput>>>,
    send_delay: Option<Duration>,
}

impl RecordingOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every output built from now on holds each send for `delay`.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Most recently built output with `name`.
    pub fn get(&self, name: &str) -> Option<Arc<RecordingOutput>> {
        lock(&self.latest).get(name).cloned()
    }

    /// Every output ever built, oldest first.
    pub fn history(&self) -> Vec<Arc<RecordingOutput>> {
        lock(&self.history).clone()
    }
}

impl OutputFactory for RecordingOutputs {
    fn build(&self, settings: &OutputSettings) -> Result<Arc<dyn Output>, ConfigError> {
        let kind = OutputKind::from_str(&settings.kind).unwrap_or(OutputKind::Webhook);
        let layout = match kind {
            OutputKind::Slack => Layout::Slack,
            OutputKind::Teams | OutputKind::Webhook => Layout::Html,
            OutputKind::Splunk => Layout::Plain,
            OutputKind::Stdout => Layout::Markdown,
        };
        let mut output = RecordingOutput::new(&settings.name, layout).with_kind(kind);
        if settings.url == "fail-init" {
            output = output.failing_init();
        }
        if let Some(delay) = self.send_delay {
            output = output.with_send_delay(delay);
        }
        let output = Arc::new(output);
        lock(&self.latest).insert(settings.name.clone(), Arc::clone(&output));
        lock(&self.history).push(Arc::clone(&output));
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

/// Gate answering the same verdict for every rule.
#[derive(Debug, Clone, Copy)]
pub struct StaticGate(pub bool);

#[async_trait]
impl PolicyGate for StaticGate {
    async fn evaluate(&self, _input: &Value, _rule: &str) -> Result<bool, GateError> {
        Ok(self.0)
    }
}

/// Gate failing every evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingGate;

#[async_trait]
impl PolicyGate for FailingGate {
    async fn evaluate(&self, _input: &Value, _rule: &str) -> Result<bool, GateError> {
        Err(GateError::Evaluation("gate unavailable".to_string()))
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// Store whose every call fails with `StorageError::Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

fn unavailable<T>() -> StorageResult<T> {
    Err(StorageError::Unavailable("store offline".to_string()))
}

#[async_trait]
impl ScanStore for FailingStore {
    async fn lookup_and_record(&self, _: &str, _: &[u8]) -> StorageResult<LookupOutcome> {
        unavailable()
    }

    async fn append_to_bucket(
        &self,
        _: &str,
        _: BucketItem,
        _: usize,
        _: bool,
    ) -> StorageResult<Vec<BucketItem>> {
        unavailable()
    }

    async fn record_invocation(&self, _: &str) -> StorageResult<()> {
        unavailable()
    }

    async fn invocation_count(&self, _: &str) -> StorageResult<u64> {
        unavailable()
    }

    async fn enforce_size_limit(&self, _: u64) -> StorageResult<usize> {
        unavailable()
    }

    async fn enforce_age_limit(&self, _: Duration) -> StorageResult<usize> {
        unavailable()
    }
}
