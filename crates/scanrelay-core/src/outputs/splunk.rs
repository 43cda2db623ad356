use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use super::{execute, Output, OutputKind};
use crate::domain::{Content, SendError};
use crate::layout::Layout;

/// Splunk HTTP Event Collector output.
pub struct SplunkOutput {
    name: String,
    url: String,
    token: String,
    http: reqwest::Client,
}

impl SplunkOutput {
    pub fn new(name: String, url: String, token: String, http: reqwest::Client) -> Self {
        Self {
            name,
            url,
            token,
            http,
        }
    }
}

#[async_trait]
impl Output for SplunkOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Splunk
    }

    fn describe_layout_capability(&self) -> Layout {
        Layout::Plain
    }

    async fn init(&self) -> Result<(), SendError> {
        info!(output = %self.name, url = %self.url, "splunk output started");
        Ok(())
    }

    async fn send(&self, content: &Content) -> Result<(), SendError> {
        let payload = json!({
            "event": content,
            "sourcetype": "_json",
            "time": Utc::now().timestamp(),
        });
        let request = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Splunk {}", self.token))
            .json(&payload);
        execute(&self.name, request).await
    }

    async fn terminate(&self) -> Result<(), SendError> {
        info!(output = %self.name, "splunk output terminated");
        Ok(())
    }
}
