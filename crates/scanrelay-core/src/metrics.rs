//! Atomic counters for one dispatcher.
//!
//! Counters are incremented silently at the call site. [`Metrics::flush`]
//! emits the current values as a single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight atomic counters, no allocations or locking.
#[derive(Debug, Default)]
pub struct Metrics {
    received: AtomicU64,
    dispatched: AtomicU64,
    not_matched: AtomicU64,
    duplicates: AtomicU64,
    absorbed: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    failures: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            not_matched: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            absorbed: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    // Inbound payloads accepted by submit.
    counter!(inc_received, received, received);
    // (route, output) jobs spawned.
    counter!(inc_dispatched, dispatched, dispatched);
    counter!(inc_not_matched, not_matched, not_matched);
    counter!(inc_duplicates, duplicates, duplicates);
    // Items held back in an aggregation bucket.
    counter!(inc_absorbed, absorbed, absorbed);
    counter!(inc_sent, sent, sent);
    counter!(inc_send_failures, send_failures, send_failures);
    // Parse, gate, render or store failures.
    counter!(inc_failures, failures, failures);

    pub fn add_dispatched(&self, jobs: usize) {
        self.dispatched.fetch_add(jobs as u64, Ordering::Relaxed);
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            received = self.received(),
            dispatched = self.dispatched(),
            not_matched = self.not_matched(),
            duplicates = self.duplicates(),
            absorbed = self.absorbed(),
            sent = self.sent(),
            send_failures = self.send_failures(),
            failures = self.failures(),
        );
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.received,
            &self.dispatched,
            &self.not_matched,
            &self.duplicates,
            &self.absorbed,
            &self.sent,
            &self.send_failures,
            &self.failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.sent(), 0);
        m.inc_sent();
        m.inc_sent();
        assert_eq!(m.sent(), 2);

        m.inc_duplicates();
        assert_eq!(m.duplicates(), 1);
        assert_eq!(m.received(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_received();
        m.inc_absorbed();
        m.inc_failures();
        m.reset();
        assert_eq!(m.received(), 0);
        assert_eq!(m.absorbed(), 0);
        assert_eq!(m.failures(), 0);
    }
}
