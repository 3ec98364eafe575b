//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use remarket_core::types::{ChannelKind, Job, Recurrence};
use remarket_scheduler::{BotRow, Campaign, CampaignStatus, Recipient, RecipientStatus};
use serde::Deserialize;

use super::server::AppState;

fn ok(value: serde_json::Value) -> Json<serde_json::Value> {
    let mut body = serde_json::json!({"ok": true});
    if let (Some(map), Some(extra)) = (body.as_object_mut(), value.as_object()) {
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
    }
    Json(body)
}

fn err(message: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": message.to_string()}))
}

/// Public health check.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Server info: version and uptime.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub tenant_id: String,
    pub channel: String,
    /// RFC3339; omitted means "due now".
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Relative alternative to `scheduled_for`.
    pub delay_ms: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub recurrence: Option<Recurrence>,
    pub max_attempts: Option<u32>,
    pub campaign_id: Option<String>,
}

/// Submit a job. Returns as soon as the job is persisted — delivery
/// happens on the owning tenant actor's timer, never on this request.
pub async fn schedule_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleRequest>,
) -> Json<serde_json::Value> {
    if req.tenant_id.is_empty() {
        return err("tenant_id is required");
    }
    let Some(channel) = ChannelKind::parse(&req.channel) else {
        return err(format!("unknown channel '{}'", req.channel));
    };

    let due = req
        .scheduled_for
        .or_else(|| req.delay_ms.map(|ms| Utc::now() + chrono::Duration::milliseconds(ms)))
        .unwrap_or_else(Utc::now);
    let mut job = Job::new(&req.tenant_id, channel, req.payload, due);
    job.recurrence = req.recurrence;
    job.campaign_id = req.campaign_id;
    if let Some(max) = req.max_attempts {
        job.max_attempts = max;
    }

    let scheduled_for = job.scheduled_for;
    match state.schedulers.schedule(job).await {
        Ok(id) => ok(serde_json::json!({
            "job_id": id,
            "scheduled_for": scheduled_for.to_rfc3339(),
        })),
        Err(e) => err(e),
    }
}

/// List a tenant's pending jobs, earliest first.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Json<serde_json::Value> {
    match state.schedulers.store().jobs_for_tenant(&tenant_id) {
        Ok(jobs) => ok(serde_json::json!({"jobs": jobs})),
        Err(e) => err(e),
    }
}

/// Cancel a pending job. Idempotent: `found` reports whether it existed.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, job_id)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    match state.schedulers.cancel(&tenant_id, &job_id).await {
        Ok(found) => ok(serde_json::json!({"found": found})),
        Err(e) => err(e),
    }
}

/// Execution log for one tenant's job, oldest entry first.
pub async fn job_log(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, job_id)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    match state.schedulers.store().logs_for_job(&tenant_id, &job_id) {
        Ok(entries) => {
            let entries: Vec<serde_json::Value> = entries
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "job_id": e.job_id,
                        "channel": e.channel.as_str(),
                        "outcome": match e.outcome {
                            remarket_scheduler::LogOutcome::Success => "success",
                            remarket_scheduler::LogOutcome::Failure => "failure",
                        },
                        "error": e.error,
                        "request": e.request,
                        "response": e.response,
                        "created_at": e.created_at.to_rfc3339(),
                    })
                })
                .collect();
            ok(serde_json::json!({"entries": entries}))
        }
        Err(e) => err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterBotRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    pub token: String,
}

/// Register a sending bot's credentials.
pub async fn register_bot(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterBotRequest>,
) -> Json<serde_json::Value> {
    let bot = BotRow {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: req.tenant_id,
        name: req.name,
        token: req.token,
    };
    match state.campaigns.put_bot(&bot) {
        Ok(()) => ok(serde_json::json!({"bot_id": bot.id})),
        Err(e) => err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub tenant_id: String,
    pub bot_id: String,
    #[serde(default)]
    pub name: String,
    pub message: String,
    /// Delivery addresses; entries may be null for recipients whose
    /// customer record has no chat id.
    #[serde(default)]
    pub recipients: Vec<Option<String>>,
}

/// Create a campaign together with its recipient rows.
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCampaignRequest>,
) -> Json<serde_json::Value> {
    if state.campaigns.get_bot(&req.bot_id).ok().flatten().is_none() {
        return err(format!("bot '{}' not found", req.bot_id));
    }

    let campaign = Campaign {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: req.tenant_id,
        bot_id: req.bot_id,
        name: req.name,
        message: req.message,
        status: CampaignStatus::Draft,
        total_recipients: 0,
        sent: 0,
        failed: 0,
        blocked: 0,
        invalid: 0,
    };
    if let Err(e) = state.campaigns.put_campaign(&campaign) {
        return err(e);
    }
    for chat_id in req.recipients {
        let recipient = Recipient {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: campaign.id.clone(),
            chat_id,
            status: RecipientStatus::Pending,
        };
        if let Err(e) = state.campaigns.add_recipient(&recipient) {
            return err(e);
        }
    }
    ok(serde_json::json!({"campaign_id": campaign.id}))
}

/// Campaign status and aggregate counters.
pub async fn campaign_status(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
) -> Json<serde_json::Value> {
    match state.campaigns.get_campaign(&campaign_id) {
        Ok(Some(c)) => ok(serde_json::json!({
            "campaign": {
                "id": c.id,
                "tenant_id": c.tenant_id,
                "name": c.name,
                "status": c.status.as_str(),
                "total_recipients": c.total_recipients,
                "sent": c.sent,
                "failed": c.failed,
                "blocked": c.blocked,
                "invalid": c.invalid,
            }
        })),
        Ok(None) => err(format!("campaign '{campaign_id}' not found")),
        Err(e) => err(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartCampaignRequest {
    /// RFC3339; omitted means "start now".
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Kick off a campaign: mark it running and schedule the driving job.
/// The drip loop takes over from there.
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Json(req): Json<StartCampaignRequest>,
) -> Json<serde_json::Value> {
    let campaign = match state.campaigns.get_campaign(&campaign_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(format!("campaign '{campaign_id}' not found")),
        Err(e) => return err(e),
    };
    if let Err(e) = state
        .campaigns
        .set_campaign_status(&campaign_id, CampaignStatus::Running)
    {
        return err(e);
    }

    let job = Job::campaign(
        &campaign.tenant_id,
        &campaign_id,
        req.scheduled_for.unwrap_or_else(Utc::now),
    );
    match state.schedulers.schedule(job).await {
        Ok(id) => ok(serde_json::json!({"job_id": id, "campaign_id": campaign_id})),
        Err(e) => err(e),
    }
}
