//! Job definitions — the core data model for deferred outbound work.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Delivery channel for a job.
///
/// `Campaign` is a meta-channel: its sender does not deliver one message
/// but drives a batch of a campaign's recipients forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Telegram,
    Discord,
    Campaign,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Telegram => "telegram",
            ChannelKind::Discord => "discord",
            ChannelKind::Campaign => "campaign",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "telegram" => Some(ChannelKind::Telegram),
            "discord" => Some(ChannelKind::Discord),
            "campaign" => Some(ChannelKind::Campaign),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job status. Informational only — the authoritative state is whether
/// the job is still present in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A unit of deferred, possibly recurring outbound work owned by one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: String,
    /// Partition key — one scheduler actor exists per tenant.
    pub tenant_id: String,
    /// Absolute time at which the job becomes due.
    pub scheduled_for: DateTime<Utc>,
    /// Delivery channel, resolved through the sender registry.
    pub channel: ChannelKind,
    /// Opaque payload interpreted only by the resolved sender.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Informational status.
    pub status: JobStatus,
    /// Hard-failure attempts consumed so far. Soft reschedules
    /// (rate limit, drip continuation) never count.
    pub attempts: u32,
    /// Retry ceiling for unclassified provider errors.
    pub max_attempts: u32,
    /// Optional recurrence rule applied after each successful run.
    pub recurrence: Option<Recurrence>,
    /// For campaign-channel jobs, the campaign this job drives.
    pub campaign_id: Option<String>,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job due at `scheduled_for`.
    pub fn new(
        tenant_id: &str,
        channel: ChannelKind,
        payload: serde_json::Value,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            scheduled_for,
            channel,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            recurrence: None,
            campaign_id: None,
            created_at: Utc::now(),
        }
    }

    /// Create a campaign-driving job.
    pub fn campaign(tenant_id: &str, campaign_id: &str, scheduled_for: DateTime<Utc>) -> Self {
        let mut job = Self::new(
            tenant_id,
            ChannelKind::Campaign,
            serde_json::json!({ "campaign_id": campaign_id }),
            scheduled_for,
        );
        job.campaign_id = Some(campaign_id.to_string());
        job
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }
}

/// How a job repeats after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recurrence {
    pub kind: RecurrenceKind,
    /// Optional "HH:mm" time-of-day overwrite (UTC) for the next run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Days of week (0 = Sunday) — declared for weekly rules; kept for
    /// forward compatibility, not consulted by the base algorithm.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn daily(time: Option<&str>) -> Self {
        Self {
            kind: RecurrenceKind::Daily,
            time: time.map(String::from),
            days: Vec::new(),
        }
    }

    pub fn weekly(time: Option<&str>) -> Self {
        Self {
            kind: RecurrenceKind::Weekly,
            time: time.map(String::from),
            days: Vec::new(),
        }
    }

    /// Compute the next occurrence strictly after `after`.
    ///
    /// Daily adds 24h, weekly adds 7 days, then the hour/minute are
    /// overwritten from `time` when given. All times are UTC.
    /// `Once` and `Monthly` return `None` — monthly is declared in the
    /// schema but intentionally not computed here.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = match self.kind {
            RecurrenceKind::Daily => Duration::days(1),
            RecurrenceKind::Weekly => Duration::days(7),
            RecurrenceKind::Once => return None,
            RecurrenceKind::Monthly => {
                tracing::warn!("monthly recurrence is not implemented, treating as terminal");
                return None;
            }
        };

        let mut next = after + step;
        if let Some((hour, minute)) = self.time.as_deref().and_then(parse_hhmm) {
            next = next
                .with_hour(hour)?
                .with_minute(minute)?
                .with_second(0)?
                .with_nanosecond(0)?;
        }
        // Time-of-day overwrite can land at or before `after`; step forward
        // until the invariant holds.
        while next <= after {
            next += step;
        }
        Some(next)
    }
}

/// Parse "HH:mm" into (hour, minute).
fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_channel_kind_roundtrip() {
        for kind in [
            ChannelKind::Telegram,
            ChannelKind::Discord,
            ChannelKind::Campaign,
        ] {
            assert_eq!(ChannelKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::parse("carrier-pigeon"), None);
    }

    #[test]
    fn test_daily_next_occurrence_with_time() {
        let last = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let rec = Recurrence::daily(Some("09:00"));
        let next = rec.next_occurrence(last).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
        assert!(next > last);
    }

    #[test]
    fn test_daily_time_overwrite_stays_after_base() {
        // Fired late at 10:30 — next 09:00 run must still be tomorrow.
        let last = Utc.with_ymd_and_hms(2026, 3, 10, 10, 30, 0).unwrap();
        let rec = Recurrence::daily(Some("09:00"));
        let next = rec.next_occurrence(last).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_daily_without_time() {
        let last = Utc.with_ymd_and_hms(2026, 3, 10, 14, 15, 0).unwrap();
        let rec = Recurrence::daily(None);
        let next = rec.next_occurrence(last).unwrap();
        assert_eq!(next, last + Duration::days(1));
    }

    #[test]
    fn test_weekly_next_occurrence() {
        let last = Utc.with_ymd_and_hms(2026, 3, 10, 8, 0, 0).unwrap();
        let rec = Recurrence::weekly(Some("08:30"));
        let next = rec.next_occurrence(last).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 17, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_monthly_and_once_are_terminal() {
        let now = Utc::now();
        let rec = Recurrence {
            kind: RecurrenceKind::Monthly,
            time: None,
            days: Vec::new(),
        };
        assert!(rec.next_occurrence(now).is_none());

        let rec = Recurrence {
            kind: RecurrenceKind::Once,
            time: None,
            days: Vec::new(),
        };
        assert!(rec.next_occurrence(now).is_none());
    }

    #[test]
    fn test_bad_time_is_ignored() {
        let last = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap();
        let rec = Recurrence::daily(Some("25:99"));
        let next = rec.next_occurrence(last).unwrap();
        assert_eq!(next, last + Duration::days(1));
    }

    #[test]
    fn test_campaign_job_builder() {
        let due = Utc::now();
        let job = Job::campaign("tenant-1", "camp-42", due);
        assert_eq!(job.channel, ChannelKind::Campaign);
        assert_eq!(job.campaign_id.as_deref(), Some("camp-42"));
        assert_eq!(job.payload["campaign_id"], "camp-42");
    }
}
