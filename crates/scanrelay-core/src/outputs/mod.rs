//! Output bindings: destinations rendered content is delivered to.
//!
//! The set of kinds is closed; [`BuiltinOutputs`] maps an `[[output]]` table
//! to one of them. Tests and embedders supply their own [`OutputFactory`].

mod slack;
mod splunk;
mod stdout;
mod teams;
mod webhook;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{env_or_plain, OutputSettings};
use crate::domain::{ConfigError, Content, SendError};
use crate::layout::Layout;

pub use slack::SlackOutput;
pub use splunk::SplunkOutput;
pub use stdout::StdoutOutput;
pub use teams::TeamsOutput;
pub use webhook::WebhookOutput;

#[async_trait]
pub trait Output: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> OutputKind;

    /// Markup dialect content should be rendered in for this output.
    fn describe_layout_capability(&self) -> Layout;

    /// Called once when the owning snapshot is built.
    async fn init(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn send(&self, content: &Content) -> Result<(), SendError>;

    /// Called once when the owning snapshot is retired.
    async fn terminate(&self) -> Result<(), SendError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Webhook,
    Slack,
    Teams,
    Splunk,
    Stdout,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Webhook => "webhook",
            OutputKind::Slack => "slack",
            OutputKind::Teams => "teams",
            OutputKind::Splunk => "splunk",
            OutputKind::Stdout => "stdout",
        }
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" | "http" => Ok(OutputKind::Webhook),
            "slack" => Ok(OutputKind::Slack),
            "teams" => Ok(OutputKind::Teams),
            "splunk" => Ok(OutputKind::Splunk),
            "stdout" => Ok(OutputKind::Stdout),
            other => Err(format!("unknown output type: {other:?}")),
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds output bindings from configuration.
pub trait OutputFactory: Send + Sync {
    fn build(&self, settings: &OutputSettings) -> Result<Arc<dyn Output>, ConfigError>;
}

/// Factory for the built-in output kinds, sharing one HTTP client.
#[derive(Debug, Clone, Default)]
pub struct BuiltinOutputs {
    http: reqwest::Client,
}

impl BuiltinOutputs {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl OutputFactory for BuiltinOutputs {
    fn build(&self, settings: &OutputSettings) -> Result<Arc<dyn Output>, ConfigError> {
        let kind = OutputKind::from_str(&settings.kind).map_err(|reason| ConfigError::Output {
            name: settings.name.clone(),
            reason,
        })?;
        debug!(output = %settings.name, kind = %kind, "building output");

        let output: Arc<dyn Output> = match kind {
            OutputKind::Webhook => Arc::new(WebhookOutput::new(
                settings.name.clone(),
                required(settings, "url", &settings.url)?,
                settings.headers.clone(),
                basic_auth(settings),
                self.http.clone(),
            )),
            OutputKind::Slack => Arc::new(SlackOutput::new(
                settings.name.clone(),
                required(settings, "url", &settings.url)?,
                self.http.clone(),
            )),
            OutputKind::Teams => Arc::new(TeamsOutput::new(
                settings.name.clone(),
                required(settings, "url", &settings.url)?,
                self.http.clone(),
            )),
            OutputKind::Splunk => Arc::new(SplunkOutput::new(
                settings.name.clone(),
                required(settings, "url", &settings.url)?,
                required(settings, "token", &settings.token)?,
                self.http.clone(),
            )),
            OutputKind::Stdout => Arc::new(StdoutOutput::new(settings.name.clone())),
        };
        Ok(output)
    }
}

/// Resolve a mandatory credential, failing the load when it is empty.
fn required(
    settings: &OutputSettings,
    field: &'static str,
    value: &str,
) -> Result<String, ConfigError> {
    let resolved = env_or_plain(value.trim());
    if resolved.is_empty() {
        return Err(ConfigError::MissingCredential {
            output: settings.name.clone(),
            field,
        });
    }
    Ok(resolved)
}

fn basic_auth(settings: &OutputSettings) -> Option<(String, String)> {
    if settings.user.trim().is_empty() {
        return None;
    }
    Some((
        env_or_plain(settings.user.trim()),
        env_or_plain(settings.password.trim()),
    ))
}

/// Send a prepared request, mapping transport failures and statuses of 400
/// and above to [`SendError`].
pub(crate) async fn execute(output: &str, request: reqwest::RequestBuilder) -> Result<(), SendError> {
    let response = request.send().await.map_err(|e| SendError::Transport {
        output: output.to_string(),
        reason: e.to_string(),
    })?;
    let status = response.status().as_u16();
    if status > 399 {
        return Err(SendError::Rejected {
            output: output.to_string(),
            status,
        });
    }
    debug!(output = %output, status, "delivery accepted");
    Ok(())
}

/// Replacement body for messages that exceed a destination's size limit.
pub fn short_message(url: &str, layout: Layout) -> String {
    let mut out = layout.p("This message is too long to display. Please visit the link to read the content.");
    let links: Vec<&str> = url.split(',').map(str::trim).filter(|u| !u.is_empty()).collect();
    for link in links {
        out.push_str(&match layout {
            Layout::Html => layout.p(&format!("<a href='{link}'>{link}</a>")),
            Layout::Slack => layout.p(&format!("<{link}>")),
            Layout::Jira => layout.p(&format!("[{link}]")),
            Layout::Markdown => layout.p(&format!("[{link}]({link})")),
            Layout::Plain => layout.p(link),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(kind: &str, f: impl FnOnce(&mut OutputSettings)) -> OutputSettings {
        let mut s = OutputSettings {
            name: format!("my-{kind}"),
            kind: kind.to_string(),
            enable: true,
            ..Default::default()
        };
        f(&mut s);
        s
    }

    #[test]
    fn builds_each_kind() {
        let factory = BuiltinOutputs::default();
        let cases = [
            (settings("webhook", |s| s.url = "http://localhost/hook".into()), OutputKind::Webhook, Layout::Html),
            (settings("slack", |s| s.url = "https://hooks.slack.com/x".into()), OutputKind::Slack, Layout::Slack),
            (settings("teams", |s| s.url = "https://outlook.office.com/x".into()), OutputKind::Teams, Layout::Html),
            (
                settings("splunk", |s| {
                    s.url = "https://splunk:8088/services/collector".into();
                    s.token = "abc".into();
                }),
                OutputKind::Splunk,
                Layout::Plain,
            ),
            (settings("stdout", |_| {}), OutputKind::Stdout, Layout::Markdown),
        ];
        for (s, kind, layout) in cases {
            let output = factory.build(&s).unwrap();
            assert_eq!(output.kind(), kind);
            assert_eq!(output.describe_layout_capability(), layout);
            assert_eq!(output.name(), s.name);
        }
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let err = BuiltinOutputs::default().build(&settings("pager", |_| {})).err();
        assert!(matches!(err, Some(ConfigError::Output { .. })));
    }

    #[test]
    fn splunk_without_token_is_missing_credential() {
        let s = settings("splunk", |s| s.url = "https://splunk:8088".into());
        let err = BuiltinOutputs::default().build(&s).err();
        assert!(matches!(
            err,
            Some(ConfigError::MissingCredential { field: "token", .. })
        ));
    }

    #[test]
    fn slack_without_url_is_missing_credential() {
        let err = BuiltinOutputs::default().build(&settings("slack", |_| {})).err();
        assert!(matches!(err, Some(ConfigError::MissingCredential { field: "url", .. })));
    }

    #[test]
    fn short_message_links_every_url() {
        let m = short_message("https://a/1,https://a/2", Layout::Slack);
        assert!(m.starts_with("This message is too long"));
        assert!(m.contains("<https://a/1>"));
        assert!(m.contains("<https://a/2>"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let http = reqwest::Client::new();
        let err = execute("hook", http.post("http://127.0.0.1:1/")).await.unwrap_err();
        assert!(matches!(err, SendError::Transport { .. }));
    }
}
