//! Discord sender — one channel-message call per job via the Bot API.

use async_trait::async_trait;
use remarket_core::error::{SendError, SendOutcome};
use remarket_core::traits::Sender;
use remarket_core::types::{ChannelKind, Job};
use std::time::Duration;

const API_BASE: &str = "https://discord.com/api/v10";

/// Cannot send messages to this user (DMs closed or bot blocked).
const CODE_CANNOT_MESSAGE_USER: u64 = 50007;

/// Discord Bot API sender.
pub struct DiscordSender {
    client: reqwest::Client,
    default_token: Option<String>,
}

impl DiscordSender {
    pub fn new(default_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_token,
        }
    }

    /// Post a message to a channel with an explicit bot token.
    pub async fn send_message(
        &self,
        bot_token: &str,
        channel_id: &str,
        content: &str,
    ) -> Result<serde_json::Value, SendError> {
        let response = self
            .client
            .post(format!("{API_BASE}/channels/{channel_id}/messages"))
            .header("Authorization", format!("Bot {bot_token}"))
            .json(&serde_json::json!({ "content": content }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SendError::Provider(format!("Discord send failed: {e}")))?;

        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        classify_response(status, &body)?;
        Ok(body)
    }
}

/// Classify a Discord API response into the sender error taxonomy.
///
/// 429 → `RateLimited` with the body's `retry_after` seconds, 403 or
/// error code 50007 → `Blocked`, 400/404 → `InvalidRequest`, anything
/// else non-2xx → `Provider`.
pub fn classify_response(status: u16, body: &serde_json::Value) -> Result<(), SendError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let message = body["message"].as_str().unwrap_or("no message").to_string();
    let code = body["code"].as_u64().unwrap_or(0);

    match status {
        429 => {
            let secs = body["retry_after"].as_f64().unwrap_or(30.0);
            Err(SendError::RateLimited {
                retry_after: Duration::from_secs_f64(secs.max(1.0)),
            })
        }
        403 => Err(SendError::Blocked(message)),
        _ if code == CODE_CANNOT_MESSAGE_USER => Err(SendError::Blocked(message)),
        400 | 404 => Err(SendError::InvalidRequest(message)),
        _ => Err(SendError::Provider(format!(
            "Discord API error {status}: {message}"
        ))),
    }
}

#[async_trait]
impl Sender for DiscordSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    async fn send(&self, job: &Job) -> Result<SendOutcome, SendError> {
        let channel_id = job.payload["channel_id"]
            .as_str()
            .ok_or_else(|| SendError::InvalidRequest("missing channel_id in payload".into()))?;
        let content = job.payload["message"]
            .as_str()
            .ok_or_else(|| SendError::InvalidRequest("missing message in payload".into()))?;
        let token = job.payload["bot_token"]
            .as_str()
            .map(String::from)
            .or_else(|| self.default_token.clone())
            .ok_or_else(|| SendError::InvalidRequest("no bot token configured".into()))?;

        let response = self.send_message(&token, channel_id, content).await?;
        Ok(SendOutcome::Done {
            response: Some(response),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        let body = serde_json::json!({"id": "123", "content": "hi"});
        assert!(classify_response(200, &body).is_ok());
    }

    #[test]
    fn test_classify_rate_limit_fractional_seconds() {
        let body = serde_json::json!({"message": "You are being rate limited.", "retry_after": 2.5});
        match classify_response(429, &body) {
            Err(SendError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs_f64(2.5));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_forbidden() {
        let body = serde_json::json!({"message": "Missing Access", "code": 50001});
        assert!(matches!(
            classify_response(403, &body),
            Err(SendError::Blocked(_))
        ));
    }

    #[test]
    fn test_classify_cannot_message_user() {
        let body =
            serde_json::json!({"message": "Cannot send messages to this user", "code": 50007});
        assert!(matches!(
            classify_response(400, &body),
            Err(SendError::Blocked(_))
        ));
    }

    #[test]
    fn test_classify_unknown_channel() {
        let body = serde_json::json!({"message": "Unknown Channel", "code": 10003});
        assert!(matches!(
            classify_response(404, &body),
            Err(SendError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_classify_server_error() {
        let body = serde_json::json!({});
        assert!(matches!(
            classify_response(502, &body),
            Err(SendError::Provider(_))
        ));
    }
}
