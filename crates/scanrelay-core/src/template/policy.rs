//! Evaluator backed by a module compiled through a [`TemplateEngine`].
//!
//! [`TemplateEngine`]: super::TemplateEngine

use std::sync::Arc;

use serde_json::{json, Value};

use super::{CompiledTemplate, ContentEvaluator, RenderContext};
use crate::domain::{Content, RenderError};

/// Where a compiled module came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOrigin {
    Inline,
    Bundled(String),
    Remote(String),
}

impl std::fmt::Display for TemplateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateOrigin::Inline => write!(f, "inline"),
            TemplateOrigin::Bundled(package) => write!(f, "bundled:{package}"),
            TemplateOrigin::Remote(url) => write!(f, "remote:{url}"),
        }
    }
}

pub struct PolicyRenderer {
    origin: TemplateOrigin,
    compiled: Arc<dyn CompiledTemplate>,
}

impl PolicyRenderer {
    pub fn new(origin: TemplateOrigin, compiled: Arc<dyn CompiledTemplate>) -> Self {
        Self { origin, compiled }
    }

    pub fn origin(&self) -> &TemplateOrigin {
        &self.origin
    }
}

/// `{"_context": {...}}` describing the routing context.
fn context_value(ctx: &RenderContext<'_>) -> Value {
    let mut context = json!({
        "server_url": ctx.server_url,
        "layout": ctx.layout.name(),
    });
    if let Some(previous) = ctx.previous {
        context["previous"] = previous.clone();
    }
    json!({ "_context": context })
}

impl ContentEvaluator for PolicyRenderer {
    fn describe(&self) -> String {
        self.origin.to_string()
    }

    fn eval(&self, event: &Value, ctx: &RenderContext<'_>) -> Result<Content, RenderError> {
        let mut input = event.clone();
        match &mut input {
            Value::Object(map) => {
                if let Value::Object(extra) = context_value(ctx) {
                    map.extend(extra);
                }
            }
            _ => return Err(RenderError::Render("event is not a JSON object".to_string())),
        }
        self.compiled.render(&input)
    }

    fn is_aggregation_supported(&self) -> bool {
        self.compiled.supports_aggregation()
    }

    fn build_aggregated_content(
        &self,
        items: &[Content],
        ctx: &RenderContext<'_>,
    ) -> Result<Content, RenderError> {
        if !self.compiled.supports_aggregation() {
            return Err(RenderError::AggregationUnsupported(self.describe()));
        }
        self.compiled.render_aggregated(items, &context_value(ctx))
    }
}
