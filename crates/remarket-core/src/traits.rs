//! Trait seams between the scheduler and the delivery adapters.

use async_trait::async_trait;

use crate::error::{SendError, SendOutcome};
use crate::types::{ChannelKind, Job};

/// A delivery adapter for one channel.
///
/// Senders are stateless request/response adapters: one invocation
/// performs one unit of outbound work and classifies any provider
/// failure into the `SendError` taxonomy. No retry logic lives here —
/// retry and backoff decisions belong to the scheduler actor.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Channel this sender handles, used as the registry key.
    fn channel(&self) -> ChannelKind;

    /// Perform the job's outbound work.
    async fn send(&self, job: &Job) -> Result<SendOutcome, SendError>;
}

impl std::fmt::Debug for dyn Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("channel", &self.channel())
            .finish()
    }
}

/// Single-recipient text delivery with an explicit credential.
///
/// The campaign executor delegates each recipient's send through this
/// seam instead of the job-level `Sender` contract, because the bot
/// token comes from the campaign's bot row, not from the job payload.
#[async_trait]
pub trait RecipientSender: Send + Sync {
    async fn send_text(
        &self,
        bot_token: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<serde_json::Value, SendError>;
}
