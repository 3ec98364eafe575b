//! Telegram sender — one `sendMessage` Bot API call per job.

use async_trait::async_trait;
use remarket_core::error::{SendError, SendOutcome};
use remarket_core::traits::{RecipientSender, Sender};
use remarket_core::types::{ChannelKind, Job};
use std::time::Duration;

/// Telegram Bot API sender.
pub struct TelegramSender {
    client: reqwest::Client,
    /// Fallback token used when the job payload carries none.
    default_token: Option<String>,
}

impl TelegramSender {
    pub fn new(default_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_token,
        }
    }

    fn api_url(token: &str, method: &str) -> String {
        format!("https://api.telegram.org/bot{token}/{method}")
    }

    /// Send a text message to a chat with an explicit bot token.
    pub async fn send_message(
        &self,
        bot_token: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<serde_json::Value, SendError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .client
            .post(Self::api_url(bot_token, "sendMessage"))
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SendError::Provider(format!("sendMessage failed: {e}")))?;

        let status = response.status().as_u16();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SendError::Provider(format!("Invalid Telegram response: {e}")))?;

        classify_response(status, &body)?;
        Ok(body)
    }
}

/// Classify a Telegram Bot API response into the sender error taxonomy.
///
/// Pure over (status, body) so it is testable without a network:
/// 429 → `RateLimited` with `parameters.retry_after`, 403 → `Blocked`
/// (user blocked the bot, bot kicked), 400 → `InvalidRequest` (bad chat
/// id, malformed payload), anything else non-ok → `Provider`.
pub fn classify_response(status: u16, body: &serde_json::Value) -> Result<(), SendError> {
    if body["ok"].as_bool() == Some(true) {
        return Ok(());
    }
    let code = body["error_code"].as_u64().unwrap_or(status as u64);
    let description = body["description"]
        .as_str()
        .unwrap_or("no description")
        .to_string();

    match code {
        429 => {
            let retry_after = body["parameters"]["retry_after"].as_u64().unwrap_or(30);
            Err(SendError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            })
        }
        403 => Err(SendError::Blocked(description)),
        400 => Err(SendError::InvalidRequest(description)),
        _ => Err(SendError::Provider(format!(
            "Telegram API error {code}: {description}"
        ))),
    }
}

/// Pull the chat id out of a payload — Telegram accepts both string and
/// numeric ids, so tolerate either.
fn payload_chat_id(payload: &serde_json::Value) -> Option<String> {
    match &payload["chat_id"] {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl Sender for TelegramSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn send(&self, job: &Job) -> Result<SendOutcome, SendError> {
        let chat_id = payload_chat_id(&job.payload)
            .ok_or_else(|| SendError::InvalidRequest("missing chat_id in payload".into()))?;
        let text = job.payload["message"]
            .as_str()
            .ok_or_else(|| SendError::InvalidRequest("missing message in payload".into()))?;
        let token = job.payload["bot_token"]
            .as_str()
            .map(String::from)
            .or_else(|| self.default_token.clone())
            .ok_or_else(|| SendError::InvalidRequest("no bot token configured".into()))?;

        let response = self.send_message(&token, &chat_id, text).await?;
        Ok(SendOutcome::Done {
            response: Some(response),
        })
    }
}

#[async_trait]
impl RecipientSender for TelegramSender {
    async fn send_text(
        &self,
        bot_token: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<serde_json::Value, SendError> {
        self.send_message(bot_token, chat_id, text).await
    }
}
