//! Campaign progress streaming.
//!
//! The executor publishes monotonic counter snapshots onto a broadcast
//! channel; the gateway fans them out to WebSocket observers. Dropping
//! events under backpressure is acceptable — every snapshot carries the
//! full counters, so a late subscriber or a lagged one only misses
//! intermediate states, never the totals.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What just happened to a single recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientDelta {
    Sent,
    Failed,
    Blocked,
    InvalidId,
}

/// One progress snapshot for a running campaign. Counters are
/// cumulative, so any single event is enough to render current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub campaign_id: String,
    pub tenant_id: String,
    pub total: u64,
    pub sent: u64,
    pub failed: u64,
    pub blocked: u64,
    pub invalid: u64,
    /// None for batch-boundary and completion events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<RecipientDelta>,
    pub done: bool,
}

impl CampaignProgress {
    pub fn remaining(&self) -> u64 {
        self.total
            .saturating_sub(self.sent + self.failed + self.blocked + self.invalid)
    }
}

/// Cloneable fan-out bus for campaign progress events.
#[derive(Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<CampaignProgress>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns silently when nobody is listening.
    pub fn publish(&self, event: CampaignProgress) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CampaignProgress> {
        self.tx.subscribe()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(256)
    }
}
