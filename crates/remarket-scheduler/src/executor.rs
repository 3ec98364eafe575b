//! Campaign executor: the `campaign` meta-channel sender.
//!
//! A broadcast to thousands of recipients never runs as one long task.
//! Each `send` invocation is a single resumable tick: pull one bounded
//! batch of pending recipients, deliver to each with jitter, update
//! rows and counters, emit progress, and report `MoreWork` if pending
//! recipients remain. The scheduler actor's generic reschedule loop
//! drives the campaign to completion across many short timer fires,
//! and a process restart resumes exactly where the rows say it
//! stopped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use remarket_core::error::{SendError, SendOutcome};
use remarket_core::traits::{RecipientSender, Sender};
use remarket_core::types::{ChannelKind, Job};

use crate::campaigns::{Campaign, CampaignDb, CampaignStatus, RecipientStatus};
use crate::progress::{CampaignProgress, ProgressBus, RecipientDelta};

pub struct CampaignExecutor {
    campaigns: Arc<CampaignDb>,
    delivery: Arc<dyn RecipientSender>,
    progress: ProgressBus,
    batch_size: u32,
    drip_delay: Duration,
    /// Sleep `min..=max` ms before each recipient. Spreading sends out
    /// keeps the traffic pattern under provider bot-detection
    /// thresholds. `(0, 0)` disables the sleep entirely.
    jitter_ms: (u64, u64),
}

impl CampaignExecutor {
    pub fn new(
        campaigns: Arc<CampaignDb>,
        delivery: Arc<dyn RecipientSender>,
        progress: ProgressBus,
    ) -> Self {
        Self {
            campaigns,
            delivery,
            progress,
            batch_size: 5,
            drip_delay: Duration::from_secs(10),
            jitter_ms: (300, 1500),
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_drip_delay(mut self, delay: Duration) -> Self {
        self.drip_delay = delay;
        self
    }

    pub fn with_jitter_ms(mut self, min: u64, max: u64) -> Self {
        self.jitter_ms = (min, max.max(min));
        self
    }

    async fn jitter(&self) {
        let (min, max) = self.jitter_ms;
        if max == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(min..=max);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn emit(&self, campaign: &Campaign, delta: Option<RecipientDelta>, done: bool) {
        self.progress.publish(CampaignProgress {
            campaign_id: campaign.id.clone(),
            tenant_id: campaign.tenant_id.clone(),
            total: campaign.total_recipients,
            sent: campaign.sent,
            failed: campaign.failed,
            blocked: campaign.blocked,
            invalid: campaign.invalid,
            delta,
            done,
        });
    }

    /// Record one recipient's terminal outcome: row status, campaign
    /// counter, and a progress event.
    fn settle(
        &self,
        campaign: &mut Campaign,
        recipient_id: &str,
        status: RecipientStatus,
        delta: RecipientDelta,
    ) -> Result<(), SendError> {
        self.campaigns
            .set_recipient_status(recipient_id, status)
            .map_err(|e| SendError::Provider(e.to_string()))?;
        self.campaigns
            .bump_counter(&campaign.id, status)
            .map_err(|e| SendError::Provider(e.to_string()))?;
        match delta {
            RecipientDelta::Sent => campaign.sent += 1,
            RecipientDelta::Failed => campaign.failed += 1,
            RecipientDelta::Blocked => campaign.blocked += 1,
            RecipientDelta::InvalidId => campaign.invalid += 1,
        }
        self.emit(campaign, Some(delta), false);
        Ok(())
    }

    fn complete(&self, campaign: &Campaign) -> Result<SendOutcome, SendError> {
        self.campaigns
            .set_campaign_status(&campaign.id, CampaignStatus::Completed)
            .map_err(|e| SendError::Provider(e.to_string()))?;
        tracing::info!(
            "campaign '{}' completed: {} sent, {} failed, {} blocked, {} invalid",
            campaign.id,
            campaign.sent,
            campaign.failed,
            campaign.blocked,
            campaign.invalid
        );
        self.emit(campaign, None, true);
        Ok(SendOutcome::Done { response: None })
    }
}

#[async_trait]
impl Sender for CampaignExecutor {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Campaign
    }

    /// One drip tick. Missing campaign or bot rows are a hard failure
    /// so operators see the misconfiguration in the execution log
    /// instead of a silently "successful" job.
    async fn send(&self, job: &Job) -> Result<SendOutcome, SendError> {
        let campaign_id = job
            .campaign_id
            .as_deref()
            .or_else(|| job.payload.get("campaign_id").and_then(|v| v.as_str()))
            .ok_or_else(|| SendError::InvalidRequest("job has no campaign_id".into()))?;

        let mut campaign = self
            .campaigns
            .get_campaign(campaign_id)
            .map_err(|e| SendError::Provider(e.to_string()))?
            .ok_or_else(|| {
                SendError::InvalidRequest(format!("campaign '{campaign_id}' not found"))
            })?;
        let bot = self
            .campaigns
            .get_bot(&campaign.bot_id)
            .map_err(|e| SendError::Provider(e.to_string()))?
            .ok_or_else(|| {
                SendError::InvalidRequest(format!("bot '{}' not found", campaign.bot_id))
            })?;

        let batch = self
            .campaigns
            .pending_recipients(campaign_id, self.batch_size)
            .map_err(|e| SendError::Provider(e.to_string()))?;
        if batch.is_empty() {
            return self.complete(&campaign);
        }

        tracing::debug!(
            "campaign '{campaign_id}': processing batch of {} recipient(s)",
            batch.len()
        );
        for recipient in &batch {
            self.jitter().await;

            let Some(chat_id) = recipient.chat_id.as_deref() else {
                tracing::warn!(
                    "recipient '{}' has no delivery address, marking failed",
                    recipient.id
                );
                self.settle(
                    &mut campaign,
                    &recipient.id,
                    RecipientStatus::Failed,
                    RecipientDelta::Failed,
                )?;
                continue;
            };

            match self
                .delivery
                .send_text(&bot.token, chat_id, &campaign.message)
                .await
            {
                Ok(_) => {
                    self.settle(
                        &mut campaign,
                        &recipient.id,
                        RecipientStatus::Sent,
                        RecipientDelta::Sent,
                    )?;
                }
                // Back off the whole campaign; this recipient stays
                // pending and the next tick retries it first.
                Err(SendError::RateLimited { retry_after }) => {
                    tracing::warn!(
                        "campaign '{campaign_id}' rate limited, pausing for {retry_after:?}"
                    );
                    return Err(SendError::RateLimited { retry_after });
                }
                Err(SendError::Blocked(reason)) => {
                    tracing::debug!("recipient '{}' blocked: {reason}", recipient.id);
                    self.settle(
                        &mut campaign,
                        &recipient.id,
                        RecipientStatus::Blocked,
                        RecipientDelta::Blocked,
                    )?;
                }
                Err(SendError::InvalidRequest(reason)) => {
                    tracing::debug!("recipient '{}' invalid: {reason}", recipient.id);
                    self.settle(
                        &mut campaign,
                        &recipient.id,
                        RecipientStatus::InvalidId,
                        RecipientDelta::InvalidId,
                    )?;
                }
                Err(SendError::Provider(reason)) => {
                    tracing::warn!("recipient '{}' send failed: {reason}", recipient.id);
                    self.settle(
                        &mut campaign,
                        &recipient.id,
                        RecipientStatus::Failed,
                        RecipientDelta::Failed,
                    )?;
                }
            }
        }

        let pending = self
            .campaigns
            .pending_count(campaign_id)
            .map_err(|e| SendError::Provider(e.to_string()))?;
        if pending > 0 {
            tracing::debug!("campaign '{campaign_id}': {pending} recipient(s) still pending");
            Ok(SendOutcome::MoreWork {
                resume_after: self.drip_delay,
            })
        } else {
            self.complete(&campaign)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::{BotRow, Recipient};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted per-recipient delivery: pops one result per call,
    /// defaults to success when the script runs dry.
    struct ScriptedDelivery {
        script: Mutex<VecDeque<Result<serde_json::Value, SendError>>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedDelivery {
        fn new(script: Vec<Result<serde_json::Value, SendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn ok() -> Arc<Self> {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl RecipientSender for ScriptedDelivery {
        async fn send_text(
            &self,
            _bot_token: &str,
            chat_id: &str,
            _text: &str,
        ) -> Result<serde_json::Value, SendError> {
            self.seen.lock().unwrap().push(chat_id.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(serde_json::json!({"ok": true})))
        }
    }

    fn seed(db: &CampaignDb, recipients: usize) {
        db.put_bot(&BotRow {
            id: "bot1".into(),
            tenant_id: "t1".into(),
            name: "promo".into(),
            token: "123:abc".into(),
        })
        .unwrap();
        db.put_campaign(&Campaign {
            id: "c1".into(),
            tenant_id: "t1".into(),
            bot_id: "bot1".into(),
            name: "winback".into(),
            message: "come back!".into(),
            status: CampaignStatus::Running,
            total_recipients: 0,
            sent: 0,
            failed: 0,
            blocked: 0,
            invalid: 0,
        })
        .unwrap();
        for i in 0..recipients {
            db.add_recipient(&Recipient {
                id: format!("r{i:02}"),
                campaign_id: "c1".into(),
                chat_id: Some(format!("{}", 1000 + i)),
                status: RecipientStatus::Pending,
            })
            .unwrap();
        }
    }

    fn executor(db: Arc<CampaignDb>, delivery: Arc<dyn RecipientSender>) -> CampaignExecutor {
        CampaignExecutor::new(db, delivery, ProgressBus::default())
            .with_batch_size(5)
            .with_drip_delay(Duration::from_secs(10))
            .with_jitter_ms(0, 0)
    }

    fn campaign_job() -> Job {
        let mut job = Job::campaign("t1", "c1", Utc::now());
        job.id = "job-c1".into();
        job
    }

    #[tokio::test]
    async fn test_drains_twelve_recipients_in_three_ticks() {
        let db = Arc::new(CampaignDb::open_in_memory().unwrap());
        seed(&db, 12);
        let exec = executor(db.clone(), ScriptedDelivery::ok());
        let job = campaign_job();

        for expected_pending in [7u64, 2] {
            match exec.send(&job).await.unwrap() {
                SendOutcome::MoreWork { resume_after } => {
                    assert_eq!(resume_after, Duration::from_secs(10));
                }
                other => panic!("expected MoreWork, got {other:?}"),
            }
            assert_eq!(db.pending_count("c1").unwrap(), expected_pending);
        }

        // Third tick drains the tail and completes in the same call.
        assert!(matches!(
            exec.send(&job).await.unwrap(),
            SendOutcome::Done { .. }
        ));
        assert_eq!(db.pending_count("c1").unwrap(), 0);
        let c = db.get_campaign("c1").unwrap().unwrap();
        assert_eq!(c.status, CampaignStatus::Completed);
        assert_eq!(c.sent, 12);
    }

    #[tokio::test]
    async fn test_empty_campaign_completes_immediately() {
        let db = Arc::new(CampaignDb::open_in_memory().unwrap());
        seed(&db, 0);
        let exec = executor(db.clone(), ScriptedDelivery::ok());

        assert!(matches!(
            exec.send(&campaign_job()).await.unwrap(),
            SendOutcome::Done { .. }
        ));
        let c = db.get_campaign("c1").unwrap().unwrap();
        assert_eq!(c.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn test_classifies_per_recipient_outcomes() {
        let db = Arc::new(CampaignDb::open_in_memory().unwrap());
        seed(&db, 4);
        let delivery = ScriptedDelivery::new(vec![
            Ok(serde_json::json!({"ok": true})),
            Err(SendError::Blocked("user blocked the bot".into())),
            Err(SendError::InvalidRequest("chat not found".into())),
            Err(SendError::Provider("502".into())),
        ]);
        let exec = executor(db.clone(), delivery);

        assert!(matches!(
            exec.send(&campaign_job()).await.unwrap(),
            SendOutcome::Done { .. }
        ));
        let c = db.get_campaign("c1").unwrap().unwrap();
        assert_eq!((c.sent, c.blocked, c.invalid, c.failed), (1, 1, 1, 1));
        // Every recipient reached a terminal status.
        assert_eq!(db.pending_count("c1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_pauses_whole_campaign() {
        let db = Arc::new(CampaignDb::open_in_memory().unwrap());
        seed(&db, 3);
        let delivery = ScriptedDelivery::new(vec![
            Ok(serde_json::json!({"ok": true})),
            Err(SendError::RateLimited {
                retry_after: Duration::from_secs(7),
            }),
        ]);
        let exec = executor(db.clone(), delivery);

        let err = exec.send(&campaign_job()).await.unwrap_err();
        assert!(matches!(
            err,
            SendError::RateLimited { retry_after } if retry_after == Duration::from_secs(7)
        ));
        // The rate-limited recipient stays pending for the next tick.
        assert_eq!(db.pending_count("c1").unwrap(), 2);
        let c = db.get_campaign("c1").unwrap().unwrap();
        assert_eq!(c.sent, 1);
    }

    #[tokio::test]
    async fn test_missing_campaign_and_bot_are_hard_failures() {
        let db = Arc::new(CampaignDb::open_in_memory().unwrap());
        let exec = executor(db.clone(), ScriptedDelivery::ok());

        let mut job = campaign_job();
        job.campaign_id = Some("ghost".into());
        assert!(matches!(
            exec.send(&job).await.unwrap_err(),
            SendError::InvalidRequest(_)
        ));

        // Campaign exists but its bot row is gone.
        seed(&db, 1);
        db.put_campaign(&Campaign {
            id: "c2".into(),
            tenant_id: "t1".into(),
            bot_id: "missing-bot".into(),
            name: "orphan".into(),
            message: "hi".into(),
            status: CampaignStatus::Running,
            total_recipients: 0,
            sent: 0,
            failed: 0,
            blocked: 0,
            invalid: 0,
        })
        .unwrap();
        let mut job = campaign_job();
        job.campaign_id = Some("c2".into());
        assert!(matches!(
            exec.send(&job).await.unwrap_err(),
            SendError::InvalidRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_recipient_without_address_fails_without_api_call() {
        let db = Arc::new(CampaignDb::open_in_memory().unwrap());
        seed(&db, 1);
        db.add_recipient(&Recipient {
            id: "r-noaddr".into(),
            campaign_id: "c1".into(),
            chat_id: None,
            status: RecipientStatus::Pending,
        })
        .unwrap();
        let delivery = ScriptedDelivery::ok();
        let exec = executor(db.clone(), delivery.clone());

        assert!(matches!(
            exec.send(&campaign_job()).await.unwrap(),
            SendOutcome::Done { .. }
        ));
        // Only the addressable recipient hit the API.
        assert_eq!(delivery.seen.lock().unwrap().len(), 1);
        let c = db.get_campaign("c1").unwrap().unwrap();
        assert_eq!((c.sent, c.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_progress_events_carry_cumulative_counts() {
        let db = Arc::new(CampaignDb::open_in_memory().unwrap());
        seed(&db, 2);
        let bus = ProgressBus::default();
        let mut rx = bus.subscribe();
        let exec = CampaignExecutor::new(db, ScriptedDelivery::ok(), bus)
            .with_batch_size(5)
            .with_jitter_ms(0, 0);

        exec.send(&campaign_job()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.sent, 1);
        assert_eq!(first.delta, Some(RecipientDelta::Sent));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.sent, 2);
        let done = rx.recv().await.unwrap();
        assert!(done.done);
        assert_eq!(done.delta, None);
        assert_eq!(done.remaining(), 0);
    }
}
