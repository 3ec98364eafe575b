//! # Remarket Senders
//!
//! Channel adapters for the remarketing pipeline. Each sender performs
//! exactly one provider API call per invocation and classifies failures
//! into the shared `SendError` taxonomy; the registry maps a channel to
//! its sender at dispatch time.

pub mod discord;
pub mod registry;
pub mod telegram;

pub use discord::DiscordSender;
pub use registry::SenderRegistry;
pub use telegram::TelegramSender;
