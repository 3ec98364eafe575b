//! Sender registry — maps a channel to its delivery adapter.

use std::collections::HashMap;
use std::sync::Arc;

use remarket_core::error::{RemarketError, Result};
use remarket_core::traits::Sender;
use remarket_core::types::ChannelKind;

/// Dispatch table from channel to sender. Built once at startup, then
/// shared read-only behind an `Arc`.
#[derive(Default)]
pub struct SenderRegistry {
    senders: HashMap<ChannelKind, Arc<dyn Sender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender under its channel. Duplicate registration is a
    /// configuration smell, not a failure: warn and keep the newcomer.
    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        let channel = sender.channel();
        if self.senders.insert(channel, sender).is_some() {
            tracing::warn!("duplicate sender registration for channel '{channel}', replacing");
        } else {
            tracing::info!("registered sender for channel '{channel}'");
        }
    }

    /// Resolve the sender for a channel. A missing sender is a
    /// configuration error.
    pub fn get(&self, channel: ChannelKind) -> Result<Arc<dyn Sender>> {
        self.senders.get(&channel).cloned().ok_or_else(|| {
            RemarketError::Config(format!("no sender registered for channel '{channel}'"))
        })
    }

    pub fn channels(&self) -> Vec<ChannelKind> {
        self.senders.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use remarket_core::error::{SendError, SendOutcome};
    use remarket_core::types::Job;

    struct NullSender(ChannelKind);

    #[async_trait]
    impl Sender for NullSender {
        fn channel(&self) -> ChannelKind {
            self.0
        }
        async fn send(&self, _job: &Job) -> std::result::Result<SendOutcome, SendError> {
            Ok(SendOutcome::Done { response: None })
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = SenderRegistry::new();
        registry.register(Arc::new(NullSender(ChannelKind::Telegram)));
        assert!(registry.get(ChannelKind::Telegram).is_ok());
    }

    #[test]
    fn test_missing_channel_is_config_error() {
        let registry = SenderRegistry::new();
        match registry.get(ChannelKind::Discord) {
            Err(RemarketError::Config(msg)) => assert!(msg.contains("discord")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = SenderRegistry::new();
        registry.register(Arc::new(NullSender(ChannelKind::Telegram)));
        registry.register(Arc::new(NullSender(ChannelKind::Telegram)));
        assert_eq!(registry.channels().len(), 1);
        assert!(registry.get(ChannelKind::Telegram).is_ok());
    }
}
