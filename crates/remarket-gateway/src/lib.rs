//! HTTP/WebSocket gateway for the remarket scheduler.
//!
//! Thin transport layer: routes translate requests into `SchedulerSet`
//! and `CampaignDb` calls, and the WebSocket endpoint forwards campaign
//! progress events to observers. No scheduling logic lives here.

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{AppState, build_router, start};
