//! Structured observability hooks for the event lifecycle.
//!
//! - `event_span` tagging every log line of one (event, route) job
//! - emission helpers for submit, routing decisions and delivery
//!
//! Events are emitted with a stable `event` field so they can be filtered in
//! JSON log pipelines.

use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bytes of payload included in diagnostic log lines.
pub const PAYLOAD_PREVIEW_LEN: usize = 100;

/// Span for one job; attach with `Instrument::instrument`.
///
/// ```ignore
/// processor.process(&job).instrument(event_span(&job.event_id, "critical-only")).await;
/// ```
pub fn event_span(event_id: &Uuid, route: &str) -> tracing::Span {
    tracing::info_span!("scanrelay.event", event_id = %event_id, route = %route)
}

/// First [`PAYLOAD_PREVIEW_LEN`] bytes of a payload, lossily decoded.
pub fn payload_preview(payload: &[u8]) -> String {
    let end = payload.len().min(PAYLOAD_PREVIEW_LEN);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

pub fn emit_event_submitted(event_id: &Uuid, bytes: usize) {
    debug!(event = "event.submitted", event_id = %event_id, bytes = bytes);
}

/// Route named by a submit is not configured.
pub fn emit_route_missing(route: &str) {
    warn!(event = "route.missing", route = %route, "route is not configured");
}

/// Binding skipped because the output or template does not resolve.
pub fn emit_binding_skipped(route: &str, output: &str, reason: &str) {
    warn!(
        event = "binding.skipped",
        route = %route,
        output = %output,
        reason = %reason,
    );
}

pub fn emit_not_matched(route: &str, output: &str) {
    debug!(event = "event.not_matched", route = %route, output = %output);
}

pub fn emit_duplicate(route: &str, unique_id: &str) {
    info!(event = "event.duplicate", route = %route, unique_id = %unique_id);
}

pub fn emit_sent(route: &str, output: &str, aggregated: usize) {
    info!(
        event = "output.sent",
        route = %route,
        output = %output,
        aggregated = aggregated,
    );
}

pub fn emit_send_failed(route: &str, output: &str, error: &dyn std::fmt::Display) {
    warn!(event = "output.send_failed", route = %route, output = %output, error = %error);
}

pub fn emit_process_failed(route: &str, output: &str, error: &dyn std::fmt::Display, payload: &[u8]) {
    warn!(
        event = "event.failed",
        route = %route,
        output = %output,
        error = %error,
        payload = %payload_preview(payload),
    );
}

pub fn emit_config_loaded(routes: usize, outputs: usize, templates: usize) {
    info!(
        event = "config.loaded",
        routes = routes,
        outputs = outputs,
        templates = templates,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_span_enters() {
        let _entered = event_span(&Uuid::new_v4(), "route1").entered();
    }

    #[test]
    fn preview_is_truncated() {
        let payload = vec![b'a'; 250];
        assert_eq!(payload_preview(&payload).len(), PAYLOAD_PREVIEW_LEN);
        assert_eq!(payload_preview(b"{}"), "{}");
    }
}
