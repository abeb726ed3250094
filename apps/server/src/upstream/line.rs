use async_trait::async_trait;

use super::Notifier;
use crate::error::AppError;

pub const LINE_PUSH_URL: &str = "https://api.line.me/v2/bot/message/push";

/// Build the body of a LINE push with a single text message.
pub fn push_body(to: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "to": to,
        "messages": [{ "type": "text", "text": text }]
    })
}

/// Pushes plain-text messages to LINE users.
pub struct LineNotifier {
    client: reqwest::Client,
    channel_token: String,
}

impl LineNotifier {
    pub fn new(channel_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            channel_token: channel_token.into(),
        }
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    async fn push(&self, user_id: &str, text: &str) -> Result<(), AppError> {
        if self.channel_token.is_empty() {
            tracing::debug!("LINE_CHANNEL_TOKEN not set, skipping push to {}", user_id);
            return Ok(());
        }

        let resp = self
            .client
            .post(LINE_PUSH_URL)
            .bearer_auth(&self.channel_token)
            .json(&push_body(user_id, text))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AppError::Upstream(format!("LINE push returned {}", status)));
        }
        Ok(())
    }
}
