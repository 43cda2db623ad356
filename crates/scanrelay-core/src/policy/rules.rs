//! Built-in clause-list rule gate.
//!
//! A rule body is one clause per line and every clause must hold:
//!
//! ```text
//! # only critical findings from the production registry
//! vulnerability_summary.critical > 0
//! registry == "prod.example.com"
//! image matches '^payments/'
//! ```
//!
//! A clause whose path is missing from the event does not hold.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::PolicyGate;
use crate::domain::{lookup, GateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    Matches,
}

impl Operator {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "contains" => Operator::Contains,
            "matches" => Operator::Matches,
            _ => return None,
        })
    }
}

/// `<path> <op> <literal>`
#[derive(Debug, Clone)]
pub struct Clause {
    pub path: String,
    pub op: Operator,
    pub literal: Value,
    pattern: Option<Regex>,
}

impl Clause {
    pub fn parse(line: &str) -> Result<Self, GateError> {
        let syntax = |reason: &str| GateError::Syntax {
            clause: line.to_string(),
            reason: reason.to_string(),
        };

        let (path, rest) = line
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| syntax("expected `<path> <operator> <value>`"))?;
        let (op, literal) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(|| syntax("missing value"))?;
        let op = Operator::parse(op).ok_or_else(|| syntax("unknown operator"))?;
        let literal = parse_literal(literal.trim()).ok_or_else(|| syntax("invalid value"))?;

        let pattern = match (op, &literal) {
            (Operator::Matches, Value::String(p)) => {
                Some(Regex::new(p).map_err(|e| syntax(&e.to_string()))?)
            }
            (Operator::Matches, _) => return Err(syntax("`matches` needs a string pattern")),
            _ => None,
        };

        Ok(Self {
            path: path.to_string(),
            op,
            literal,
            pattern,
        })
    }

    pub fn holds(&self, input: &Value) -> bool {
        let Some(actual) = lookup(input, &self.path) else {
            return false;
        };
        match self.op {
            Operator::Eq => loose_eq(actual, &self.literal),
            Operator::Ne => !loose_eq(actual, &self.literal),
            Operator::Gt => compare(actual, &self.literal) == Some(Ordering::Greater),
            Operator::Ge => matches!(
                compare(actual, &self.literal),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare(actual, &self.literal) == Some(Ordering::Less),
            Operator::Le => matches!(
                compare(actual, &self.literal),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Contains => match (actual, &self.literal) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|i| loose_eq(i, needle)),
                _ => false,
            },
            Operator::Matches => match (actual, &self.pattern) {
                (Value::String(s), Some(re)) => re.is_match(s),
                _ => false,
            },
        }
    }
}

fn parse_literal(text: &str) -> Option<Value> {
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        return Some(Value::String(text[1..text.len() - 1].to_string()));
    }
    serde_json::from_str(text).ok()
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Parse a rule body into clauses, skipping blank lines and `#` comments.
pub fn parse_rule(rule: &str) -> Result<Vec<Clause>, GateError> {
    rule.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(Clause::parse)
        .collect()
}

/// Gate evaluating clause-list rules. Each distinct rule body is parsed once
/// and its clauses shared by every later evaluation.
#[derive(Debug, Default, Clone)]
pub struct RuleGate {
    compiled: Arc<Mutex<HashMap<String, Arc<[Clause]>>>>,
}

impl RuleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rule bodies compiled so far.
    pub fn compiled_rules(&self) -> usize {
        self.compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn clauses(&self, rule: &str) -> Result<Arc<[Clause]>, GateError> {
        let mut compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(clauses) = compiled.get(rule) {
            return Ok(Arc::clone(clauses));
        }
        // only successful parses are kept; a bad rule fails on every call
        let clauses: Arc<[Clause]> = parse_rule(rule)?.into();
        compiled.insert(rule.to_string(), Arc::clone(&clauses));
        Ok(clauses)
    }
}

#[async_trait]
impl PolicyGate for RuleGate {
    async fn evaluate(&self, input: &Value, rule: &str) -> Result<bool, GateError> {
        let clauses = self.clauses(rule)?;
        Ok(clauses.iter().all(|c| c.holds(input)))
    }

    fn validate(&self, rule: &str) -> Result<(), GateError> {
        self.clauses(rule).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan() -> Value {
        json!({
            "image": "payments/api:1.4",
            "registry": "prod.example.com",
            "vulnerability_summary": { "critical": 2, "high": 0, "medium": 5 },
            "application_scope_owners": ["alice@example.com"],
            "image_assurance_results": { "disallowed": true }
        })
    }

    async fn eval(rule: &str) -> Result<bool, GateError> {
        RuleGate::new().evaluate(&scan(), rule).await
    }

    #[tokio::test]
    async fn empty_rule_matches_everything() {
        assert!(eval("").await.unwrap());
        assert!(eval("  \n# just a comment\n").await.unwrap());
    }

    #[tokio::test]
    async fn numeric_comparisons() {
        assert!(eval("vulnerability_summary.critical > 0").await.unwrap());
        assert!(eval("input.vulnerability_summary.high == 0").await.unwrap());
        assert!(eval("vulnerability_summary.medium <= 5").await.unwrap());
        assert!(!eval("vulnerability_summary.medium < 5").await.unwrap());
        assert!(eval("vulnerability_summary.critical == 2.0").await.unwrap());
    }

    #[tokio::test]
    async fn all_clauses_must_hold() {
        let rule = "vulnerability_summary.critical > 0\nregistry == \"prod.example.com\"";
        assert!(eval(rule).await.unwrap());
        let rule = "vulnerability_summary.critical > 0\nregistry == 'staging.example.com'";
        assert!(!eval(rule).await.unwrap());
    }

    #[tokio::test]
    async fn string_operators() {
        assert!(eval("image contains 'payments'").await.unwrap());
        assert!(eval("image matches '^payments/'").await.unwrap());
        assert!(eval("application_scope_owners contains \"alice@example.com\"").await.unwrap());
        assert!(eval("image_assurance_results.disallowed == true").await.unwrap());
    }

    #[tokio::test]
    async fn missing_path_does_not_hold() {
        assert!(!eval("digest == 'sha256:x'").await.unwrap());
        assert!(!eval("digest != 'sha256:x'").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_rules_are_errors() {
        assert!(matches!(eval("critical").await, Err(GateError::Syntax { .. })));
        assert!(matches!(eval("image ~= 'x'").await, Err(GateError::Syntax { .. })));
        assert!(matches!(eval("image == unquoted").await, Err(GateError::Syntax { .. })));
        assert!(matches!(eval("image matches '(('").await, Err(GateError::Syntax { .. })));
        assert!(matches!(eval("image matches 3").await, Err(GateError::Syntax { .. })));
    }

    #[tokio::test]
    async fn malformed_clause_fails_even_after_false_clause() {
        let rule = "registry == 'nope'\nimage ~~ 'x'";
        assert!(eval(rule).await.is_err());
    }

    #[tokio::test]
    async fn rule_bodies_are_compiled_once() {
        let gate = RuleGate::new();
        let rule = "vulnerability_summary.critical > 0\nimage matches '^payments/'";
        for _ in 0..3 {
            assert!(gate.evaluate(&scan(), rule).await.unwrap());
        }
        assert_eq!(gate.compiled_rules(), 1);

        let shared = gate.clone();
        assert!(!shared.evaluate(&scan(), "registry == 'nope'").await.unwrap());
        assert_eq!(gate.compiled_rules(), 2);
    }

    #[test]
    fn validate_rejects_malformed_rules_without_keeping_them() {
        let gate = RuleGate::new();
        assert!(gate.validate("registry == 'prod.example.com'").is_ok());
        assert!(matches!(
            gate.validate("image matches '(('"),
            Err(GateError::Syntax { .. })
        ));
        assert_eq!(gate.compiled_rules(), 1);
    }
}
