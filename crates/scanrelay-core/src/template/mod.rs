//! Content evaluators: turn a parsed event into a rendered content map.
//!
//! Each configured template selects exactly one variant at load time:
//!
//! - `legacy_scan_renderer` → [`LegacyScanRenderer`]
//! - `rego_package` → bundled module compiled by the [`TemplateEngine`]
//! - `body` → inline module compiled by the [`TemplateEngine`]
//! - `url` → module fetched once at load, then compiled
//!
//! Evaluators are immutable after construction and shared across tasks.

mod legacy;
mod placeholder;
mod policy;

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::config::{TemplateSettings, TemplateSource};
use crate::domain::{ConfigError, Content, RenderError};
use crate::layout::Layout;

pub use legacy::LegacyScanRenderer;
pub use placeholder::{CompiledTemplate, PlaceholderEngine, TemplateEngine};
pub use policy::{PolicyRenderer, TemplateOrigin};

/// Routing context an evaluator renders with.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Server URL prefix for links, possibly empty.
    pub server_url: &'a str,
    /// Dialect of the output the content is rendered for.
    pub layout: Layout,
    /// Previously recorded scan of the same identity, when it changed.
    pub previous: Option<&'a Value>,
}

pub trait ContentEvaluator: Send + Sync {
    /// Short description used in logs.
    fn describe(&self) -> String;

    fn eval(&self, event: &Value, ctx: &RenderContext<'_>) -> Result<Content, RenderError>;

    fn is_aggregation_supported(&self) -> bool;

    /// Merge queued items into one message.
    fn build_aggregated_content(
        &self,
        items: &[Content],
        ctx: &RenderContext<'_>,
    ) -> Result<Content, RenderError>;
}

/// Construct the evaluator selected by `settings`.
///
/// Remote modules are fetched here; any transport error or HTTP status of 400
/// and above fails the load.
pub async fn build_evaluator(
    settings: &TemplateSettings,
    engine: &dyn TemplateEngine,
    http: &reqwest::Client,
    bundle_dir: Option<&Path>,
) -> Result<Arc<dyn ContentEvaluator>, ConfigError> {
    let template_error = |reason: String| ConfigError::Template {
        name: settings.name.clone(),
        reason,
    };

    match settings.source()? {
        TemplateSource::Legacy(name) => {
            let renderer = LegacyScanRenderer::from_name(name).map_err(template_error)?;
            info!(template = %settings.name, renderer = %name, "configured legacy renderer");
            Ok(Arc::new(renderer))
        }
        TemplateSource::Inline(body) => {
            let compiled = engine
                .compile("inline", body)
                .map_err(|e| template_error(e.to_string()))?;
            info!(template = %settings.name, "configured inline template");
            Ok(Arc::new(PolicyRenderer::new(TemplateOrigin::Inline, compiled)))
        }
        TemplateSource::Bundled(package) => {
            let dir = bundle_dir.ok_or_else(|| {
                template_error(format!("package {package} requires bundle_dir"))
            })?;
            let path = dir.join(format!("{package}.toml"));
            let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
                template_error(format!("cannot read {}: {e}", path.display()))
            })?;
            let compiled = engine
                .compile(package, &source)
                .map_err(|e| template_error(e.to_string()))?;
            info!(template = %settings.name, package = %package, "configured bundled template");
            Ok(Arc::new(PolicyRenderer::new(
                TemplateOrigin::Bundled(package.to_string()),
                compiled,
            )))
        }
        TemplateSource::Remote(url) => {
            let source = fetch_remote(http, url).await?;
            let module = module_name(url);
            let compiled = engine
                .compile(&module, &source)
                .map_err(|e| template_error(e.to_string()))?;
            info!(template = %settings.name, url = %url, "configured remote template");
            Ok(Arc::new(PolicyRenderer::new(
                TemplateOrigin::Remote(url.to_string()),
                compiled,
            )))
        }
    }
}

async fn fetch_remote(http: &reqwest::Client, url: &str) -> Result<String, ConfigError> {
    let remote_error = |reason: String| ConfigError::RemoteTemplate {
        url: url.to_string(),
        reason,
    };
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| remote_error(e.to_string()))?;
    let status = response.status();
    if status.as_u16() > 399 {
        return Err(remote_error(format!("response status is {}", status.as_u16())));
    }
    response.text().await.map_err(|e| remote_error(e.to_string()))
}

/// Last path segment of a URL, without query or fragment.
fn module_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("remote")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(f: impl FnOnce(&mut TemplateSettings)) -> TemplateSettings {
        let mut s = TemplateSettings {
            name: "t".to_string(),
            ..Default::default()
        };
        f(&mut s);
        s
    }

    #[test]
    fn module_name_is_last_segment() {
        assert_eq!(module_name("https://example.com/tpl/vuls.toml?x=1"), "vuls.toml");
        assert_eq!(module_name("https://example.com/"), "example.com");
    }

    #[tokio::test]
    async fn legacy_variant_is_selected() {
        let s = settings(|s| s.legacy_scan_renderer = Some("html".into()));
        let eval = build_evaluator(&s, &PlaceholderEngine, &reqwest::Client::new(), None)
            .await
            .unwrap();
        assert!(eval.describe().contains("legacy"));
        assert!(eval.is_aggregation_supported());
    }

    #[tokio::test]
    async fn unknown_legacy_renderer_fails_load() {
        let s = settings(|s| s.legacy_scan_renderer = Some("xml".into()));
        let err = build_evaluator(&s, &PlaceholderEngine, &reqwest::Client::new(), None).await;
        assert!(matches!(err, Err(ConfigError::Template { .. })));
    }

    #[tokio::test]
    async fn inline_variant_compiles_body() {
        let s = settings(|s| {
            s.body = Some("title = \"{image}\"\ndescription = \"{registry}\"".into())
        });
        let eval = build_evaluator(&s, &PlaceholderEngine, &reqwest::Client::new(), None)
            .await
            .unwrap();
        assert!(eval.describe().contains("inline"));
        assert!(!eval.is_aggregation_supported());
    }

    #[tokio::test]
    async fn inline_with_bad_syntax_fails_load() {
        let s = settings(|s| s.body = Some("title = \"{image\"\ndescription = \"x\"".into()));
        let err = build_evaluator(&s, &PlaceholderEngine, &reqwest::Client::new(), None).await;
        assert!(matches!(err, Err(ConfigError::Template { .. })));
    }

    #[tokio::test]
    async fn bundled_variant_reads_package_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("vuls.slack.toml"),
            "title = \"{image} report\"\ndescription = \"critical: {vulnerability_summary.critical}\"\n",
        )
        .unwrap();
        let s = settings(|s| s.rego_package = Some("vuls.slack".into()));
        let eval = build_evaluator(
            &s,
            &PlaceholderEngine,
            &reqwest::Client::new(),
            Some(dir.path()),
        )
        .await
        .unwrap();
        assert!(eval.describe().contains("vuls.slack"));
    }

    #[tokio::test]
    async fn bundled_without_dir_fails_load() {
        let s = settings(|s| s.rego_package = Some("vuls.slack".into()));
        let err = build_evaluator(&s, &PlaceholderEngine, &reqwest::Client::new(), None).await;
        assert!(matches!(err, Err(ConfigError::Template { .. })));
    }

    #[tokio::test]
    async fn unreachable_remote_fails_load() {
        let s = settings(|s| s.url = Some("http://127.0.0.1:1/template.toml".into()));
        let err = build_evaluator(&s, &PlaceholderEngine, &reqwest::Client::new(), None).await;
        assert!(matches!(err, Err(ConfigError::RemoteTemplate { .. })));
    }
}
