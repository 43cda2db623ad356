//! Policy gate: decides whether an event matches a route.
//!
//! The core only relies on the boolean contract of [`PolicyGate`]. The rule
//! language belongs to the gate implementation; [`RuleGate`] is the built-in
//! one.

mod rules;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::GateError;

pub use rules::{Clause, Operator, RuleGate};

/// Characters rewritten in raw payloads before they reach the gate, as
/// `(reserved, replacement)` pairs. Backticks would terminate raw strings in
/// rule bodies.
pub const DEFAULT_RESERVED: &[(u8, u8)] = &[(b'`', b'\'')];

#[async_trait]
pub trait PolicyGate: Send + Sync {
    /// Evaluate `rule` against the structured event. An empty rule matches.
    async fn evaluate(&self, input: &Value, rule: &str) -> Result<bool, GateError>;

    /// Reject a rule that can never evaluate. Called once per route when a
    /// configuration is loaded.
    fn validate(&self, _rule: &str) -> Result<(), GateError> {
        Ok(())
    }

    /// Reserved characters this gate needs escaped in raw payloads.
    fn reserved_characters(&self) -> &[(u8, u8)] {
        DEFAULT_RESERVED
    }
}

/// Replace every reserved byte of `payload` with its replacement.
pub fn sanitize(payload: &[u8], reserved: &[(u8, u8)]) -> Vec<u8> {
    payload
        .iter()
        .map(|b| {
            reserved
                .iter()
                .find(|(from, _)| from == b)
                .map(|(_, to)| *to)
                .unwrap_or(*b)
        })
        .collect()
}
