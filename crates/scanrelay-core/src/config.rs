//! Configuration file model.
//!
//! The file is TOML. One load yields one [`Config`], from which the dispatcher
//! builds an immutable snapshot.
//!
//! ```toml
//! server_url = "https://scanner.example.com"
//! delete_old_data = 30
//!
//! [[route]]
//! name = "critical-only"
//! input = "vulnerability_summary.critical > 0"
//! outputs = ["team-slack"]
//! template = "legacy"
//!
//! [route.plugins]
//! aggregate_issues_number = 5
//!
//! [[template]]
//! name = "legacy"
//! legacy_scan_renderer = "auto"
//!
//! [[output]]
//! name = "team-slack"
//! type = "slack"
//! enable = true
//! url = "https://hooks.slack.com/services/T/B/W"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Where a configuration is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Inline(String),
}

impl ConfigSource {
    /// Read and parse the configuration.
    pub async fn read(&self) -> Result<Config, ConfigError> {
        match self {
            ConfigSource::File(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|source| ConfigError::Read {
                        path: path.clone(),
                        source,
                    })?;
                Config::from_toml_str(&text)
            }
            ConfigSource::Inline(text) => Config::from_toml_str(text),
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Inline(_) => write!(f, "<inline>"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_url: Option<String>,
    /// Size bound for stored dedup records in bytes, 0 = unlimited.
    pub max_db_size: u64,
    /// Age bound for stored dedup records in days, 0 = keep forever.
    pub delete_old_data: u64,
    /// Maintenance cadence in hours, 0 is treated as 1.
    pub db_verify_interval: u64,
    pub queue_capacity: Option<usize>,
    pub max_in_flight: Option<usize>,
    pub bundle_dir: Option<PathBuf>,
    #[serde(rename = "route")]
    pub routes: Vec<RouteSettings>,
    #[serde(rename = "template")]
    pub templates: Vec<TemplateSettings>,
    #[serde(rename = "output")]
    pub outputs: Vec<OutputSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    pub name: String,
    /// Policy rule text; empty matches every event.
    pub input: String,
    pub outputs: Vec<String>,
    pub template: String,
    pub plugins: RoutePlugins,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePlugins {
    pub aggregate_issues_number: usize,
    pub aggregate_timeout_seconds: u64,
    pub policy_show_all: bool,
}

/// Exactly one of the source fields must be populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub name: String,
    pub legacy_scan_renderer: Option<String>,
    pub rego_package: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

/// Which variant a template selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource<'a> {
    Legacy(&'a str),
    Bundled(&'a str),
    Inline(&'a str),
    Remote(&'a str),
}

impl TemplateSettings {
    pub fn source(&self) -> Result<TemplateSource<'_>, ConfigError> {
        let mut found = Vec::new();
        if let Some(v) = populated(&self.legacy_scan_renderer) {
            found.push(TemplateSource::Legacy(v));
        }
        if let Some(v) = populated(&self.rego_package) {
            found.push(TemplateSource::Bundled(v));
        }
        if let Some(v) = populated(&self.body) {
            found.push(TemplateSource::Inline(v));
        }
        if let Some(v) = populated(&self.url) {
            found.push(TemplateSource::Remote(v));
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(ConfigError::Template {
                name: self.name.clone(),
                reason: "one of legacy_scan_renderer, rego_package, body or url is required"
                    .to_string(),
            }),
            _ => Err(ConfigError::Template {
                name: self.name.clone(),
                reason: "only one of legacy_scan_renderer, rego_package, body or url may be set"
                    .to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enable: bool,
    pub url: String,
    pub user: String,
    pub password: String,
    pub token: String,
    pub headers: BTreeMap<String, String>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        unique_names("route", self.routes.iter().map(|r| r.name.as_str()))?;
        unique_names("template", self.templates.iter().map(|t| t.name.as_str()))?;
        unique_names("output", self.outputs.iter().map(|o| o.name.as_str()))?;

        for route in &self.routes {
            if route.name.trim().is_empty() {
                return Err(ConfigError::Route {
                    route: route.name.clone(),
                    reason: "route name must not be empty".to_string(),
                });
            }
        }
        for template in &self.templates {
            template.source()?;
        }
        Ok(())
    }

    /// Server URL prefix used when linking to scan results.
    ///
    /// `https://host` becomes `https://host/#/images/`; empty when unset.
    pub fn server_url_prefix(&self) -> String {
        match self.server_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                let slash = if url.ends_with('/') { "" } else { "/" };
                format!("{url}{slash}#/images/")
            }
            _ => String::new(),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn maintenance_multiplier(&self) -> u32 {
        match self.db_verify_interval {
            0 => 1,
            n => n.min(u32::MAX as u64) as u32,
        }
    }
}

fn populated(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn unique_names<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Resolve a credential that may name an environment variable.
///
/// When `value` is the name of a set, non-empty environment variable its value
/// is returned; otherwise `value` itself.
pub fn env_or_plain(value: &str) -> String {
    match std::env::var(value) {
        Ok(v) if !v.is_empty() => v,
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server_url = "https://demolab.example.com"
max_db_size = 1048576
delete_old_data = 7
db_verify_interval = 2

[[route]]
name = "route1"
input = "vulnerability_summary.critical > 0"
outputs = ["my-slack", "my-hook"]
template = "legacy"

[route.plugins]
aggregate_issues_number = 3
policy_show_all = true

[[route]]
name = "route2"
outputs = []
template = "inline"

[[template]]
name = "legacy"
legacy_scan_renderer = "auto"

[[template]]
name = "inline"
body = 'title = "{image}"'

[[output]]
name = "my-slack"
type = "slack"
enable = true
url = "https://hooks.slack.com/services/TT/BBB/WWWW"

[[output]]
name = "my-hook"
type = "webhook"
enable = false
url = "http://localhost:8080/hook"
"#;

    #[test]
    fn parses_sample() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.routes.len(), 2);
        assert_eq!(cfg.routes[0].plugins.aggregate_issues_number, 3);
        assert!(cfg.routes[0].plugins.policy_show_all);
        assert!(cfg.routes[1].outputs.is_empty());
        assert_eq!(cfg.templates.len(), 2);
        assert_eq!(cfg.outputs[0].kind, "slack");
        assert!(!cfg.outputs[1].enable);
        assert_eq!(cfg.maintenance_multiplier(), 2);
        assert_eq!(cfg.queue_capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn server_url_gets_image_suffix() {
        let cfg = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.server_url_prefix(), "https://demolab.example.com/#/images/");

        let cfg = Config {
            server_url: Some("https://x.example.com/".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.server_url_prefix(), "https://x.example.com/#/images/");
        assert_eq!(Config::default().server_url_prefix(), "");
    }

    #[test]
    fn duplicate_route_is_rejected() {
        let text = r#"
[[route]]
name = "a"
[[route]]
name = "a"
"#;
        let err = Config::from_toml_str(text).unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate { kind: "route", .. }));
    }

    #[test]
    fn template_needs_exactly_one_source() {
        let none = TemplateSettings {
            name: "t".into(),
            ..Default::default()
        };
        assert!(none.source().is_err());

        let two = TemplateSettings {
            name: "t".into(),
            body: Some("title = 'x'".into()),
            url: Some("https://example.com/t.toml".into()),
            ..Default::default()
        };
        assert!(two.source().is_err());

        let one = TemplateSettings {
            name: "t".into(),
            rego_package: Some("vuls.html".into()),
            ..Default::default()
        };
        assert_eq!(one.source().unwrap(), TemplateSource::Bundled("vuls.html"));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = Config::from_toml_str("[[route]\nname=").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_verify_interval_defaults_to_one() {
        assert_eq!(Config::default().maintenance_multiplier(), 1);
    }

    #[test]
    fn env_or_plain_prefers_environment() {
        std::env::set_var("SCANRELAY_TEST_SECRET", "s3cret");
        assert_eq!(env_or_plain("SCANRELAY_TEST_SECRET"), "s3cret");
        assert_eq!(env_or_plain("literal-value"), "literal-value");
    }

    #[tokio::test]
    async fn reads_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = ConfigSource::File(path).read().await.unwrap();
        assert_eq!(cfg.outputs.len(), 2);

        let missing = ConfigSource::File(dir.path().join("nope.toml")).read().await;
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
