use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{execute, short_message, Output, OutputKind};
use crate::domain::content::{DESCRIPTION, TITLE, URL};
use crate::domain::{Content, SendError};
use crate::layout::Layout;

/// Slack truncates message text beyond this many characters.
const SLACK_TEXT_LIMIT: usize = 40_000;

/// Incoming-webhook Slack output rendering mrkdwn.
pub struct SlackOutput {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl SlackOutput {
    pub fn new(name: String, url: String, http: reqwest::Client) -> Self {
        Self { name, url, http }
    }
}

/// Escape the three characters Slack treats as control sequences.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn message_text(content: &Content) -> String {
    let layout = Layout::Slack;
    let title = content.get(TITLE).map(String::as_str).unwrap_or_default();
    let description = content.get(DESCRIPTION).map(String::as_str).unwrap_or_default();
    let body = if description.chars().count() > SLACK_TEXT_LIMIT {
        // link markup must stay unescaped
        short_message(content.get(URL).map(String::as_str).unwrap_or_default(), layout)
    } else {
        escape(description)
    };
    format!("{}{body}", escape(&layout.title_h2(title)))
}

#[async_trait]
impl Output for SlackOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Slack
    }

    fn describe_layout_capability(&self) -> Layout {
        Layout::Slack
    }

    async fn init(&self) -> Result<(), SendError> {
        info!(output = %self.name, "slack output started");
        Ok(())
    }

    async fn send(&self, content: &Content) -> Result<(), SendError> {
        let payload = json!({ "text": message_text(content) });
        execute(&self.name, self.http.post(&self.url).json(&payload)).await
    }

    async fn terminate(&self) -> Result<(), SendError> {
        info!(output = %self.name, "slack output terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(description: String) -> Content {
        Content::from([
            (TITLE.to_string(), "alpine <3.18>".to_string()),
            (DESCRIPTION.to_string(), description),
            (URL.to_string(), "https://x/#/images/a".to_string()),
        ])
    }

    #[test]
    fn escapes_control_characters() {
        let text = message_text(&content("a & b".to_string()));
        assert_eq!(text, "*alpine &lt;3.18&gt;*\na &amp; b");
    }

    #[test]
    fn oversized_body_becomes_link() {
        let text = message_text(&content("x".repeat(SLACK_TEXT_LIMIT + 1)));
        assert!(text.contains("too long to display"));
        assert!(text.contains("<https://x/#/images/a>"));
        assert!(text.len() < 500);
    }
}
