//! Scanrelay Core Library
//!
//! Routes scan result events to notification outputs: policy-gated fan-out,
//! dedup against the last recorded scan, rendering and batched delivery.

pub mod aggregation;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod fakes;
pub mod layout;
pub mod maintenance;
pub mod metrics;
pub mod obs;
pub mod outputs;
pub mod policy;
pub mod processor;
pub mod routing;
pub mod snapshot;
pub mod telemetry;
pub mod template;

pub use aggregation::{bucket_key, SchedulerRegistry};
pub use config::{Config, ConfigSource, OutputSettings, RouteSettings, TemplateSettings};
pub use dispatcher::{Dispatcher, DispatcherDeps};
pub use domain::{
    ConfigError, Content, GateError, ProcessError, RelayError, RenderError, Result, ScanRecord,
    SendError,
};
pub use layout::Layout;
pub use metrics::Metrics;
pub use outputs::{BuiltinOutputs, Output, OutputFactory, OutputKind};
pub use policy::{PolicyGate, RuleGate};
pub use processor::{ProcessOutcome, Processor};
pub use routing::{dispatch, dispatch_all, AggregationPolicy, DispatchHandle, Job, Route};
pub use snapshot::Snapshot;
pub use telemetry::init_tracing;
pub use template::{
    CompiledTemplate, ContentEvaluator, LegacyScanRenderer, PlaceholderEngine, PolicyRenderer,
    RenderContext, TemplateEngine,
};

pub use scanrelay_state::{MemoryScanStore, ScanStore};

/// Crate version, embedded in the HTTP user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
