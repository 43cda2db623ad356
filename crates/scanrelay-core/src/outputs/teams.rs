use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{execute, short_message, Output, OutputKind};
use crate::domain::content::{DESCRIPTION, TITLE, URL};
use crate::domain::{Content, SendError};
use crate::layout::Layout;

/// Approximate payload limit of a Teams connector card, in bytes.
pub const TEAMS_SIZE_LIMIT: usize = 28_672;

/// Microsoft Teams incoming-webhook output rendering HTML.
pub struct TeamsOutput {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl TeamsOutput {
    pub fn new(name: String, url: String, http: reqwest::Client) -> Self {
        Self { name, url, http }
    }
}

fn message_html(content: &Content) -> String {
    let layout = Layout::Html;
    let title = content.get(TITLE).map(String::as_str).unwrap_or_default();
    let description = content.get(DESCRIPTION).map(String::as_str).unwrap_or_default();
    let body = if description.len() > TEAMS_SIZE_LIMIT {
        short_message(content.get(URL).map(String::as_str).unwrap_or_default(), layout)
    } else {
        description.to_string()
    };
    format!("{}{body}", layout.title_h2(title))
}

#[async_trait]
impl Output for TeamsOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Teams
    }

    fn describe_layout_capability(&self) -> Layout {
        Layout::Html
    }

    async fn init(&self) -> Result<(), SendError> {
        info!(output = %self.name, "teams output started");
        Ok(())
    }

    async fn send(&self, content: &Content) -> Result<(), SendError> {
        let payload = json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "text": message_html(content),
        });
        execute(&self.name, self.http.post(&self.url).json(&payload)).await
    }

    async fn terminate(&self) -> Result<(), SendError> {
        info!(output = %self.name, "teams output terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_body_is_sent_verbatim() {
        let content = Content::from([
            (TITLE.to_string(), "report".to_string()),
            (DESCRIPTION.to_string(), "<p>ok</p>".to_string()),
        ]);
        assert_eq!(message_html(&content), "<h2>report</h2>\n<p>ok</p>");
    }

    #[test]
    fn body_over_limit_is_replaced() {
        let content = Content::from([
            (TITLE.to_string(), "report".to_string()),
            (DESCRIPTION.to_string(), "a".repeat(TEAMS_SIZE_LIMIT + 1)),
            (URL.to_string(), "https://x/#/images/a".to_string()),
        ]);
        let html = message_html(&content);
        assert!(html.contains("<a href='https://x/#/images/a'>"));
        assert!(html.len() < TEAMS_SIZE_LIMIT);
    }
}
