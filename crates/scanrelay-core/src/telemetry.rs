//! Log setup shared by the daemon and the integration tests.
//!
//! Everything is written to stderr. The stdout output kind prints one JSON
//! message per line and must not interleave with log records.

use std::io;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide subscriber, as JSON lines when `json` is set.
///
/// `RUST_LOG` replaces the default filter entirely. Without it, scanrelay's
/// own crates log at `level` and dependencies only at `warn`. Returns `false`
/// when a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let text = (!json).then(|| fmt::layer().with_target(false).with_writer(io::stderr));
    let json = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok()
}

fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    EnvFilter::new(format!(
        "warn,scanrelay_core={level},scanrelay_state={level},scanrelayd={level}"
    ))
}
