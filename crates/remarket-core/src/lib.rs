//! # Remarket Core
//!
//! Shared foundation for the remarketing pipeline: the job data model,
//! the error taxonomy raised by channel senders, the `Sender` trait that
//! every delivery adapter implements, and the TOML configuration system.
//!
//! Everything channel- or storage-specific lives in the other crates;
//! this one only defines the seams they meet at.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::RemarketConfig;
pub use error::{RemarketError, Result, SendError, SendOutcome};
pub use traits::{RecipientSender, Sender};
pub use types::{ChannelKind, Job, JobStatus, Recurrence, RecurrenceKind};
