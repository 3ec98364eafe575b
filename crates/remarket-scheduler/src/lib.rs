//! # Remarket Scheduler
//!
//! Durable, per-tenant job scheduling and the campaign execution
//! pipeline behind it.
//!
//! ## Architecture
//! ```text
//! POST /schedule ──► SchedulerSet ──► TenantScheduler (one actor per tenant)
//!                                       ├── single wake-up timer = min(scheduled_for)
//!                                       ├── JobStore (SQLite: jobs + execution_log)
//!                                       └── on fire → SenderRegistry
//!                                             ├── TelegramSender / DiscordSender
//!                                             └── CampaignExecutor
//!                                                   ├── CampaignDb (recipients, counters)
//!                                                   ├── drip batches + jitter
//!                                                   └── ProgressBus → WebSocket observers
//! ```
//!
//! A campaign broadcast is not a long-lived task: each timer fire
//! processes one bounded recipient batch, and the executor's "more work
//! remains" outcome reschedules the same job until the campaign drains.

pub mod actor;
pub mod campaigns;
pub mod executor;
pub mod jobs;
pub mod progress;
pub mod store;

pub use actor::{SchedulerHandle, SchedulerSet, TenantScheduler};
pub use campaigns::{BotRow, Campaign, CampaignDb, CampaignStatus, Recipient, RecipientStatus};
pub use executor::CampaignExecutor;
pub use jobs::{RetryDecision, RetryPolicy};
pub use progress::{CampaignProgress, ProgressBus, RecipientDelta};
pub use store::{JobStore, LogEntry, LogOutcome};
