//! Rendered content maps and JSON path lookup shared by the gate and templates.

use serde_json::Value;

/// Destination-agnostic rendered message: at minimum `title` and `description`.
pub type Content = scanrelay_state::BucketItem;

pub const TITLE: &str = "title";
pub const DESCRIPTION: &str = "description";
pub const URL: &str = "url";
/// Raw inbound payload attached to every rendered message.
pub const SRC: &str = "src";
pub const OWNERS: &str = "owners";

/// Resolve a dotted path (`a.b.0.c`) inside a JSON value.
///
/// A leading `input.` segment is accepted and ignored. Numeric segments index
/// arrays. Returns `None` when any segment is missing.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path.strip_prefix("input.").unwrap_or(path);
    if path.is_empty() || path == "input" {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a JSON value as message text: strings verbatim, null as empty.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let v = json!({
            "vulnerability_summary": { "critical": 3 },
            "resources": [ { "resource": { "name": "openssl" } } ]
        });
        assert_eq!(lookup(&v, "vulnerability_summary.critical"), Some(&json!(3)));
        assert_eq!(lookup(&v, "input.vulnerability_summary.critical"), Some(&json!(3)));
        assert_eq!(lookup(&v, "resources.0.resource.name"), Some(&json!("openssl")));
        assert_eq!(lookup(&v, "resources.1.resource.name"), None);
        assert_eq!(lookup(&v, "registry"), None);
    }

    #[test]
    fn display_value_formats_scalars() {
        assert_eq!(display_value(&json!("x")), "x");
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!(2)), "2");
        assert_eq!(display_value(&json!([1, 2])), "[1,2]");
    }
}
