//! Error taxonomy for scanrelay.
//!
//! Only `ConfigError` ever reaches the caller of `start`/`reload`. Every other
//! error is contained in the task that produced it and ends up in the logs.

use std::path::PathBuf;

use scanrelay_state::StorageError;

/// Fatal to a configuration load; the whole load is aborted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate {kind} name: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("route {route}: {reason}")]
    Route { route: String, reason: String },

    #[error("template {name}: {reason}")]
    Template { name: String, reason: String },

    #[error("remote template {url}: {reason}")]
    RemoteTemplate { url: String, reason: String },

    #[error("output {name}: {reason}")]
    Output { name: String, reason: String },

    #[error("output {output} requires {field}")]
    MissingCredential { output: String, field: &'static str },
}

/// Policy gate failure: malformed rule or evaluation exception.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("malformed rule clause {clause:?}: {reason}")]
    Syntax { clause: String, reason: String },

    #[error("rule evaluation failed: {0}")]
    Evaluation(String),
}

/// Content evaluator failure.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template module {module} does not compile: {reason}")]
    Compile { module: String, reason: String },

    #[error("rendering failed: {0}")]
    Render(String),

    #[error("aggregation is not supported by {0}")]
    AggregationUnsupported(String),
}

/// Delivery failure reported by an output binding.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("output {output}: transport error: {reason}")]
    Transport { output: String, reason: String },

    #[error("output {output}: endpoint answered with status {status}")]
    Rejected { output: String, status: u16 },

    #[error("output {output}: {reason}")]
    Encode { output: String, reason: String },
}

/// Per-event failure; aborts that (route, output) path only.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("payload is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("policy gate: {0}")]
    Gate(#[from] GateError),

    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error("store: {0}")]
    Store(#[from] StorageError),
}

/// Errors surfaced by the dispatcher API.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error("dispatcher is not running")]
    NotStarted,

    #[error("inbound queue is closed")]
    QueueClosed,
}

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, RelayError>;
