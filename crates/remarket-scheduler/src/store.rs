//! SQLite-backed persistence for jobs and the execution log.
//! Survives restarts; a scheduler actor reloads its tenant's jobs and
//! re-arms its timer from this store alone.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use remarket_core::error::{RemarketError, Result};
use remarket_core::types::{ChannelKind, Job, JobStatus};

/// Durable store for pending jobs plus the append-only execution log.
pub struct JobStore {
    conn: Mutex<rusqlite::Connection>,
}

impl JobStore {
    /// Open or create the job database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| RemarketError::Storage(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| RemarketError::Storage(format!("DB open: {e}")))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            -- Pending jobs, keyed by tenant + id. A job present here is
            -- either awaiting its due time or mid-flight; it is deleted
            -- once terminally resolved.
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                scheduled_for INTEGER NOT NULL,  -- ms since epoch
                channel TEXT NOT NULL,
                payload TEXT NOT NULL,           -- JSON
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                recurrence TEXT,                 -- JSON, nullable
                campaign_id TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, id)
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_wake ON jobs (tenant_id, scheduled_for);

            -- Immutable audit trail: one row per terminal attempt outcome.
            CREATE TABLE IF NOT EXISTS execution_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                outcome TEXT NOT NULL,           -- 'success' | 'failure'
                error TEXT,
                request TEXT NOT NULL,           -- JSON payload as submitted
                response TEXT,                   -- JSON provider response
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_log_job ON execution_log (job_id);
         ",
            )
            .map_err(|e| RemarketError::Storage(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Jobs ─────────────────────────────────────────────────

    /// Insert or rewrite a job.
    pub fn put(&self, job: &Job) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO jobs
                 (id, tenant_id, scheduled_for, channel, payload, status, attempts,
                  max_attempts, recurrence, campaign_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    job.id,
                    job.tenant_id,
                    job.scheduled_for.timestamp_millis(),
                    job.channel.as_str(),
                    job.payload.to_string(),
                    status_str(job.status),
                    job.attempts,
                    job.max_attempts,
                    job.recurrence
                        .as_ref()
                        .and_then(|r| serde_json::to_string(r).ok()),
                    job.campaign_id,
                    job.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| RemarketError::Storage(format!("Save job: {e}")))?;
        Ok(())
    }

    /// Fetch a single job.
    pub fn get(&self, tenant_id: &str, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, scheduled_for, channel, payload, status, attempts,
                        max_attempts, recurrence, campaign_id, created_at
                 FROM jobs WHERE tenant_id = ?1 AND id = ?2",
            )
            .map_err(|e| RemarketError::Storage(format!("Get job: {e}")))?;
        let job = stmt
            .query_map(rusqlite::params![tenant_id, job_id], row_to_job)
            .map_err(|e| RemarketError::Storage(format!("Get job: {e}")))?
            .filter_map(|r| r.ok().flatten())
            .next();
        Ok(job)
    }

    /// Delete a job. Returns whether it existed.
    pub fn delete(&self, tenant_id: &str, job_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM jobs WHERE tenant_id = ?1 AND id = ?2",
                rusqlite::params![tenant_id, job_id],
            )
            .map_err(|e| RemarketError::Storage(format!("Delete job: {e}")))?;
        Ok(changed > 0)
    }

    /// All jobs for one tenant, earliest first.
    pub fn jobs_for_tenant(&self, tenant_id: &str) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, scheduled_for, channel, payload, status, attempts,
                        max_attempts, recurrence, campaign_id, created_at
                 FROM jobs WHERE tenant_id = ?1 ORDER BY scheduled_for",
            )
            .map_err(|e| RemarketError::Storage(format!("List jobs: {e}")))?;
        let jobs = stmt
            .query_map([tenant_id], row_to_job)
            .map_err(|e| RemarketError::Storage(format!("List jobs: {e}")))?
            .filter_map(|r| r.ok().flatten())
            .collect();
        Ok(jobs)
    }

    /// Earliest `scheduled_for` among the tenant's jobs — the time the
    /// actor's single timer must be armed to. `None` means no timer.
    pub fn next_wake(&self, tenant_id: &str) -> Result<Option<DateTime<Utc>>> {
        let ms: Option<i64> = self
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT MIN(scheduled_for) FROM jobs WHERE tenant_id = ?1",
                [tenant_id],
                |row| row.get(0),
            )
            .map_err(|e| RemarketError::Storage(format!("Next wake: {e}")))?;
        Ok(ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Tenants that still have pending jobs — used to respawn actors
    /// after a process restart.
    pub fn tenants_with_jobs(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT tenant_id FROM jobs")
            .map_err(|e| RemarketError::Storage(format!("List tenants: {e}")))?;
        let tenants = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| RemarketError::Storage(format!("List tenants: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tenants)
    }

    // ─── Execution log ────────────────────────────────────────

    /// Append one audit record. Log rows are never updated or deleted.
    pub fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO execution_log
                 (job_id, tenant_id, channel, outcome, error, request, response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    entry.job_id,
                    entry.tenant_id,
                    entry.channel.as_str(),
                    match entry.outcome {
                        LogOutcome::Success => "success",
                        LogOutcome::Failure => "failure",
                    },
                    entry.error,
                    entry.request.to_string(),
                    entry.response.as_ref().map(|r| r.to_string()),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| RemarketError::Storage(format!("Append log: {e}")))?;
        Ok(())
    }

    /// All log entries for one tenant's job, oldest first. Scoped by
    /// tenant like the jobs table itself.
    pub fn logs_for_job(&self, tenant_id: &str, job_id: &str) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT job_id, tenant_id, channel, outcome, error, request, response, created_at
                 FROM execution_log WHERE tenant_id = ?1 AND job_id = ?2 ORDER BY id",
            )
            .map_err(|e| RemarketError::Storage(format!("Read log: {e}")))?;
        let entries = stmt
            .query_map(rusqlite::params![tenant_id, job_id], |row| {
                let channel: String = row.get(2)?;
                let outcome: String = row.get(3)?;
                let request: String = row.get(5)?;
                let response: Option<String> = row.get(6)?;
                let created_at: String = row.get(7)?;
                Ok(LogEntry {
                    job_id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    channel: ChannelKind::parse(&channel).unwrap_or(ChannelKind::Telegram),
                    outcome: if outcome == "success" {
                        LogOutcome::Success
                    } else {
                        LogOutcome::Failure
                    },
                    error: row.get(4)?,
                    request: serde_json::from_str(&request).unwrap_or_default(),
                    response: response.and_then(|r| serde_json::from_str(&r).ok()),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| RemarketError::Storage(format!("Read log: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }
}

/// One execution attempt's audit record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub job_id: String,
    pub tenant_id: String,
    pub channel: ChannelKind,
    pub outcome: LogOutcome,
    pub error: Option<String>,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Success,
    Failure,
}

impl LogEntry {
    pub fn success(job: &Job, response: Option<serde_json::Value>) -> Self {
        Self {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            channel: job.channel,
            outcome: LogOutcome::Success,
            error: None,
            request: job.payload.clone(),
            response,
            created_at: Utc::now(),
        }
    }

    pub fn failure(job: &Job, error: &str) -> Self {
        Self {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            channel: job.channel,
            outcome: LogOutcome::Failure,
            error: Some(error.to_string()),
            request: job.payload.clone(),
            response: None,
            created_at: Utc::now(),
        }
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Job>> {
    let id: String = row.get(0)?;
    let tenant_id: String = row.get(1)?;
    let scheduled_ms: i64 = row.get(2)?;
    let channel: String = row.get(3)?;
    let payload: String = row.get(4)?;
    let status: String = row.get(5)?;
    let attempts: u32 = row.get(6)?;
    let max_attempts: u32 = row.get(7)?;
    let recurrence: Option<String> = row.get(8)?;
    let campaign_id: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;

    let Some(channel) = ChannelKind::parse(&channel) else {
        tracing::warn!("skipping job {id}: unknown channel '{channel}'");
        return Ok(None);
    };

    Ok(Some(Job {
        id,
        tenant_id,
        scheduled_for: Utc
            .timestamp_millis_opt(scheduled_ms)
            .single()
            .unwrap_or_else(Utc::now),
        channel,
        payload: serde_json::from_str(&payload).unwrap_or_default(),
        status: match status.as_str() {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending,
        },
        attempts,
        max_attempts,
        recurrence: recurrence.and_then(|r| serde_json::from_str(&r).ok()),
        campaign_id,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use remarket_core::types::Recurrence;

    fn job_at(tenant: &str, offset_secs: i64) -> Job {
        Job::new(
            tenant,
            ChannelKind::Telegram,
            serde_json::json!({"chat_id": "1", "message": "hi"}),
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn test_put_get_delete() {
        let store = JobStore::open_in_memory().unwrap();
        let job = job_at("t1", 60);
        store.put(&job).unwrap();

        let loaded = store.get("t1", &job.id).unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.channel, ChannelKind::Telegram);
        assert_eq!(loaded.payload["message"], "hi");
        assert_eq!(
            loaded.scheduled_for.timestamp_millis(),
            job.scheduled_for.timestamp_millis()
        );

        assert!(store.delete("t1", &job.id).unwrap());
        assert!(!store.delete("t1", &job.id).unwrap());
        assert!(store.get("t1", &job.id).unwrap().is_none());
    }

    #[test]
    fn test_recurrence_roundtrip() {
        let store = JobStore::open_in_memory().unwrap();
        let job = job_at("t1", 60).with_recurrence(Recurrence::daily(Some("09:00")));
        store.put(&job).unwrap();
        let loaded = store.get("t1", &job.id).unwrap().unwrap();
        assert_eq!(loaded.recurrence.unwrap().time.as_deref(), Some("09:00"));
    }

    #[test]
    fn test_next_wake_is_minimum() {
        let store = JobStore::open_in_memory().unwrap();
        assert!(store.next_wake("t1").unwrap().is_none());

        let late = job_at("t1", 90);
        let early = job_at("t1", 30);
        let other_tenant = job_at("t2", 5);
        store.put(&late).unwrap();
        store.put(&early).unwrap();
        store.put(&other_tenant).unwrap();

        let wake = store.next_wake("t1").unwrap().unwrap();
        assert_eq!(
            wake.timestamp_millis(),
            early.scheduled_for.timestamp_millis()
        );

        store.delete("t1", &early.id).unwrap();
        let wake = store.next_wake("t1").unwrap().unwrap();
        assert_eq!(
            wake.timestamp_millis(),
            late.scheduled_for.timestamp_millis()
        );
    }

    #[test]
    fn test_tenants_with_jobs() {
        let store = JobStore::open_in_memory().unwrap();
        store.put(&job_at("t1", 10)).unwrap();
        store.put(&job_at("t1", 20)).unwrap();
        store.put(&job_at("t2", 10)).unwrap();

        let mut tenants = store.tenants_with_jobs().unwrap();
        tenants.sort();
        assert_eq!(tenants, vec!["t1", "t2"]);
    }

    #[test]
    fn test_execution_log_append_and_read() {
        let store = JobStore::open_in_memory().unwrap();
        let job = job_at("t1", 0);

        store.append_log(&LogEntry::success(
            &job,
            Some(serde_json::json!({"ok": true})),
        ))
        .unwrap();
        store
            .append_log(&LogEntry::failure(&job, "blocked: user blocked the bot"))
            .unwrap();

        let logs = store.logs_for_job("t1", &job.id).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].outcome, LogOutcome::Success);
        assert!(logs[0].response.is_some());
        assert_eq!(logs[1].outcome, LogOutcome::Failure);
        assert!(logs[1].error.as_deref().unwrap().contains("blocked"));
        assert_eq!(logs[1].request["chat_id"], "1");
    }

    #[test]
    fn test_execution_log_is_scoped_by_tenant() {
        let store = JobStore::open_in_memory().unwrap();
        let mut t1_job = job_at("t1", 0);
        t1_job.id = "shared-id".into();
        let mut t2_job = job_at("t2", 0);
        t2_job.id = "shared-id".into();

        store.append_log(&LogEntry::success(&t1_job, None)).unwrap();
        store
            .append_log(&LogEntry::failure(&t2_job, "provider error: 502"))
            .unwrap();

        let t1_logs = store.logs_for_job("t1", "shared-id").unwrap();
        assert_eq!(t1_logs.len(), 1);
        assert_eq!(t1_logs[0].outcome, LogOutcome::Success);

        let t2_logs = store.logs_for_job("t2", "shared-id").unwrap();
        assert_eq!(t2_logs.len(), 1);
        assert_eq!(t2_logs[0].outcome, LogOutcome::Failure);

        assert!(store.logs_for_job("t3", "shared-id").unwrap().is_empty());
    }
}
