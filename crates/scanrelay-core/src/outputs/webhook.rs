use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use super::{execute, Output, OutputKind};
use crate::domain::{Content, SendError};
use crate::layout::Layout;

/// POSTs the content map as a JSON object.
pub struct WebhookOutput {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    auth: Option<(String, String)>,
    http: reqwest::Client,
}

impl WebhookOutput {
    pub fn new(
        name: String,
        url: String,
        headers: BTreeMap<String, String>,
        auth: Option<(String, String)>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            name,
            url,
            headers,
            auth,
            http,
        }
    }
}

#[async_trait]
impl Output for WebhookOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> OutputKind {
        OutputKind::Webhook
    }

    fn describe_layout_capability(&self) -> Layout {
        Layout::Html
    }

    async fn init(&self) -> Result<(), SendError> {
        info!(output = %self.name, url = %self.url, "webhook output started");
        Ok(())
    }

    async fn send(&self, content: &Content) -> Result<(), SendError> {
        let mut request = self.http.post(&self.url).json(content);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        execute(&self.name, request).await
    }

    async fn terminate(&self) -> Result<(), SendError> {
        info!(output = %self.name, "webhook output terminated");
        Ok(())
    }
}
