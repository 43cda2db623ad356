//! Template engine seam and the built-in placeholder engine.
//!
//! A placeholder module is a TOML table whose string values are rendered by
//! substituting `{dotted.path}` references against the event:
//!
//! ```toml
//! title = "{image} scanned"
//! description = "critical: {vulnerability_summary.critical}"
//! url = "{_context.server_url}{registry}"
//!
//! [aggregation]
//! title = "{count} scans"
//! item = "{title}: {description}"
//! separator = "\n---\n"
//! ```
//!
//! `{{` and `}}` produce literal braces. Missing paths render as empty text.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::content::{DESCRIPTION, TITLE, URL};
use crate::domain::{display_value, lookup, Content, RenderError};

/// Compiles template modules. The engine owns the template language.
pub trait TemplateEngine: Send + Sync {
    fn compile(&self, module: &str, source: &str)
        -> Result<Arc<dyn CompiledTemplate>, RenderError>;
}

/// A compiled module, safe to render concurrently.
pub trait CompiledTemplate: Send + Sync {
    fn render(&self, input: &Value) -> Result<Content, RenderError>;

    fn supports_aggregation(&self) -> bool;

    /// `context` carries the same `_context` object `render` receives.
    fn render_aggregated(&self, items: &[Content], context: &Value)
        -> Result<Content, RenderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern(Vec<Segment>);

impl Pattern {
    fn parse(text: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut path = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => path.push(ch),
                            None => return Err(format!("unclosed placeholder {{{path}")),
                        }
                    }
                    let path = path.trim();
                    if path.is_empty() {
                        return Err("empty placeholder {}".to_string());
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Path(path.to_string()));
                }
                '}' => return Err("unmatched }".to_string()),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }
        Ok(Self(segments))
    }

    fn render(&self, root: &Value) -> String {
        let mut out = String::new();
        for segment in &self.0 {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Path(p) => {
                    if let Some(v) = lookup(root, p) {
                        out.push_str(&display_value(v));
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
struct Aggregation {
    title: Pattern,
    item: Pattern,
    separator: String,
}

#[derive(Debug, Clone)]
struct PlaceholderTemplate {
    fields: BTreeMap<String, Pattern>,
    aggregation: Option<Aggregation>,
}

impl CompiledTemplate for PlaceholderTemplate {
    fn render(&self, input: &Value) -> Result<Content, RenderError> {
        Ok(self
            .fields
            .iter()
            .map(|(key, pattern)| (key.clone(), pattern.render(input)))
            .collect())
    }

    fn supports_aggregation(&self) -> bool {
        self.aggregation.is_some()
    }

    fn render_aggregated(
        &self,
        items: &[Content],
        context: &Value,
    ) -> Result<Content, RenderError> {
        let agg = self
            .aggregation
            .as_ref()
            .ok_or_else(|| RenderError::AggregationUnsupported("placeholder module".into()))?;

        let header = json!({ "count": items.len(), "_context": context.get("_context") });
        let rendered: Vec<String> = items
            .iter()
            .map(|item| {
                let mut root = json!(item);
                root["_context"] = header["_context"].clone();
                agg.item.render(&root)
            })
            .collect();
        let urls: Vec<&str> = items
            .iter()
            .filter_map(|i| i.get(URL).map(String::as_str))
            .filter(|u| !u.is_empty())
            .collect();

        let mut content = Content::new();
        content.insert(TITLE.to_string(), agg.title.render(&header));
        content.insert(DESCRIPTION.to_string(), rendered.join(&agg.separator));
        if !urls.is_empty() {
            content.insert(URL.to_string(), urls.join(","));
        }
        Ok(content)
    }
}

/// Built-in [`TemplateEngine`] for placeholder modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderEngine;

impl TemplateEngine for PlaceholderEngine {
    fn compile(
        &self,
        module: &str,
        source: &str,
    ) -> Result<Arc<dyn CompiledTemplate>, RenderError> {
        let compile_error = |reason: String| RenderError::Compile {
            module: module.to_string(),
            reason,
        };
        let table: toml::Table = toml::from_str(source).map_err(|e| compile_error(e.to_string()))?;

        let mut fields = BTreeMap::new();
        let mut aggregation = None;
        for (key, value) in &table {
            match (key.as_str(), value) {
                ("aggregation", toml::Value::Table(agg)) => {
                    aggregation = Some(compile_aggregation(agg).map_err(compile_error)?);
                }
                (_, toml::Value::String(text)) => {
                    let pattern = Pattern::parse(text)
                        .map_err(|e| compile_error(format!("field {key}: {e}")))?;
                    fields.insert(key.clone(), pattern);
                }
                _ => return Err(compile_error(format!("field {key} must be a string"))),
            }
        }
        for required in [TITLE, DESCRIPTION] {
            if !fields.contains_key(required) {
                return Err(compile_error(format!("missing required field {required}")));
            }
        }

        Ok(Arc::new(PlaceholderTemplate {
            fields,
            aggregation,
        }))
    }
}

fn compile_aggregation(table: &toml::Table) -> Result<Aggregation, String> {
    let pattern = |key: &str, default: &str| -> Result<Pattern, String> {
        match table.get(key) {
            None => Pattern::parse(default),
            Some(toml::Value::String(text)) => {
                Pattern::parse(text).map_err(|e| format!("aggregation.{key}: {e}"))
            }
            Some(_) => Err(format!("aggregation.{key} must be a string")),
        }
    };
    let separator = match table.get("separator") {
        None => "\n".to_string(),
        Some(toml::Value::String(s)) => s.clone(),
        Some(_) => return Err("aggregation.separator must be a string".to_string()),
    };
    Ok(Aggregation {
        title: pattern("title", "{count} reports")?,
        item: pattern("item", "{title}\n{description}")?,
        separator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = r#"
title = "{image} scanned"
description = "critical: {vulnerability_summary.critical}, {{literal}}"
url = "{_context.server_url}{registry}"

[aggregation]
title = "{count} scans"
item = "{title}"
separator = " | "
"#;

    fn event() -> Value {
        json!({
            "image": "alpine:3.18",
            "registry": "docker.io",
            "vulnerability_summary": { "critical": 3 },
            "_context": { "server_url": "https://x/#/images/", "layout": "html" }
        })
    }

    #[test]
    fn renders_fields() {
        let t = PlaceholderEngine.compile("m", MODULE).unwrap();
        let c = t.render(&event()).unwrap();
        assert_eq!(c[TITLE], "alpine:3.18 scanned");
        assert_eq!(c[DESCRIPTION], "critical: 3, {literal}");
        assert_eq!(c[URL], "https://x/#/images/docker.io");
    }

    #[test]
    fn missing_path_renders_empty() {
        let t = PlaceholderEngine
            .compile("m", "title = \"[{nope.deeper}]\"\ndescription = \"\"")
            .unwrap();
        assert_eq!(t.render(&event()).unwrap()[TITLE], "[]");
    }

    #[test]
    fn aggregates_with_separator() {
        let t = PlaceholderEngine.compile("m", MODULE).unwrap();
        assert!(t.supports_aggregation());
        let a = t.render(&event()).unwrap();
        let mut other = event();
        other["image"] = json!("nginx");
        let b = t.render(&other).unwrap();

        let merged = t.render_aggregated(&[a, b], &event()).unwrap();
        assert_eq!(merged[TITLE], "2 scans");
        assert_eq!(merged[DESCRIPTION], "alpine:3.18 scanned | nginx scanned");
        assert_eq!(merged[URL], "https://x/#/images/docker.io,https://x/#/images/docker.io");
    }

    #[test]
    fn without_aggregation_table_merging_is_unsupported() {
        let t = PlaceholderEngine
            .compile("m", "title = \"a\"\ndescription = \"b\"")
            .unwrap();
        assert!(!t.supports_aggregation());
        assert!(matches!(
            t.render_aggregated(&[], &Value::Null),
            Err(RenderError::AggregationUnsupported(_))
        ));
    }

    #[test]
    fn compile_errors() {
        for source in [
            "title = \"{image\"\ndescription = \"x\"",
            "title = \"image}\"\ndescription = \"x\"",
            "title = \"{}\"\ndescription = \"x\"",
            "description = \"only\"",
            "title = 1\ndescription = \"x\"",
            "not toml at all",
        ] {
            let err = PlaceholderEngine.compile("m", source).err();
            assert!(
                matches!(err, Some(RenderError::Compile { .. })),
                "expected compile error for {source:?}"
            );
        }
    }
}
