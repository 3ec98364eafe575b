//! Per-tenant scheduler actor.
//!
//! One tokio task per tenant owns that tenant's job set: commands and
//! timer fires for one tenant never overlap, so read-modify-write of
//! its jobs needs no external locking. Different tenants' actors run
//! fully in parallel.
//!
//! The actor holds exactly one timer regardless of job count. Every
//! loop iteration recomputes the wake time as `min(scheduled_for)` over
//! the tenant's stored jobs, so any mutation — schedule, cancel, or a
//! rewrite inside the timer handler — implicitly rearms it. An early
//! wake that finds nothing due is a cheap no-op.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use remarket_core::error::{RemarketError, Result, SendError, SendOutcome};
use remarket_core::types::{Job, JobStatus};
use remarket_senders::SenderRegistry;
use tokio::sync::{mpsc, oneshot};

use crate::jobs::{RetryDecision, RetryPolicy};
use crate::store::{JobStore, LogEntry};

/// Commands accepted by a tenant's scheduler actor.
enum Command {
    Schedule {
        job: Job,
        reply: oneshot::Sender<Result<String>>,
    },
    Cancel {
        job_id: String,
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// Cloneable handle to one tenant's scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Persist a job and let the actor arm its timer to cover it.
    /// Submission never blocks on the job's own network I/O.
    pub async fn schedule(&self, job: Job) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Schedule { job, reply })
            .map_err(|_| RemarketError::scheduler("scheduler actor is gone"))?;
        rx.await
            .map_err(|_| RemarketError::scheduler("scheduler actor dropped the reply"))?
    }

    /// Best-effort delete: prevents future executions but does not
    /// abort an execution already in flight. Returns whether the job
    /// existed; cancelling twice or cancelling an unknown id is fine.
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Cancel {
                job_id: job_id.to_string(),
                reply,
            })
            .map_err(|_| RemarketError::scheduler("scheduler actor is gone"))?;
        rx.await
            .map_err(|_| RemarketError::scheduler("scheduler actor dropped the reply"))?
    }
}

/// The actor itself — owns one tenant's timer loop.
pub struct TenantScheduler {
    tenant_id: String,
    store: Arc<JobStore>,
    registry: Arc<SenderRegistry>,
    policy: RetryPolicy,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl TenantScheduler {
    /// Spawn the actor task and return its handle.
    pub fn spawn(
        tenant_id: String,
        store: Arc<JobStore>,
        registry: Arc<SenderRegistry>,
        policy: RetryPolicy,
    ) -> SchedulerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Self {
            tenant_id,
            store,
            registry,
            policy,
            rx,
        };
        tokio::spawn(actor.run());
        SchedulerHandle { tx }
    }

    async fn run(mut self) {
        tracing::info!("scheduler actor started for tenant '{}'", self.tenant_id);
        loop {
            let next_wake = match self.store.next_wake(&self.tenant_id) {
                Ok(wake) => wake,
                Err(e) => {
                    tracing::error!("tenant '{}': next_wake failed: {e}", self.tenant_id);
                    None
                }
            };

            match next_wake {
                Some(at) => {
                    let until_due = (at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
                    tokio::select! {
                        cmd = self.rx.recv() => match cmd {
                            Some(cmd) => self.handle_command(cmd),
                            None => break,
                        },
                        _ = tokio::time::sleep(until_due) => self.on_timer().await,
                    }
                }
                // No jobs: no timer armed, just wait for commands.
                None => match self.rx.recv().await {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
            }
        }
        tracing::info!("scheduler actor stopped for tenant '{}'", self.tenant_id);
    }

    fn handle_command(&self, cmd: Command) {
        match cmd {
            Command::Schedule { job, reply } => {
                let id = job.id.clone();
                tracing::info!(
                    "tenant '{}': scheduled job {id} on '{}' for {}",
                    self.tenant_id,
                    job.channel,
                    job.scheduled_for
                );
                let _ = reply.send(self.store.put(&job).map(|_| id));
            }
            Command::Cancel { job_id, reply } => {
                let result = self.store.delete(&self.tenant_id, &job_id);
                if matches!(result, Ok(true)) {
                    tracing::info!("tenant '{}': cancelled job {job_id}", self.tenant_id);
                }
                let _ = reply.send(result);
            }
        }
    }

    /// The sole background entry point: fire everything due, leave the
    /// rest for the next (implicitly rearmed) wake.
    async fn on_timer(&self) {
        let now = Utc::now();
        let jobs = match self.store.jobs_for_tenant(&self.tenant_id) {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("tenant '{}': loading jobs failed: {e}", self.tenant_id);
                return;
            }
        };
        let due: Vec<Job> = jobs.into_iter().filter(|j| j.scheduled_for <= now).collect();
        if !due.is_empty() {
            tracing::debug!("tenant '{}': {} job(s) due", self.tenant_id, due.len());
        }
        // Sequential on purpose: one tenant's storage writes never race.
        for job in due {
            self.execute(job).await;
        }
    }

    async fn execute(&self, mut job: Job) {
        let now = Utc::now();
        let sender = match self.registry.get(job.channel) {
            Ok(sender) => sender,
            Err(e) => {
                tracing::error!("dropping job {}: {e}", job.id);
                self.log(LogEntry::failure(&job, &e.to_string()));
                self.remove(&job);
                return;
            }
        };

        match sender.send(&job).await {
            Ok(SendOutcome::Done { response }) => {
                self.log(LogEntry::success(&job, response));
                let base = job.scheduled_for.max(now);
                match job.recurrence.as_ref().and_then(|r| r.next_occurrence(base)) {
                    Some(next) => {
                        tracing::info!("job {} recurs at {next}", job.id);
                        job.scheduled_for = next;
                        job.attempts = 0;
                        job.status = JobStatus::Pending;
                        self.persist(&job);
                    }
                    None => {
                        tracing::info!("job {} completed", job.id);
                        self.remove(&job);
                    }
                }
            }
            Ok(SendOutcome::MoreWork { resume_after }) => {
                // Drip continuation: job stays alive, no log entry.
                tracing::debug!("job {} has more work, resuming in {resume_after:?}", job.id);
                job.scheduled_for = now + to_chrono(resume_after);
                self.persist(&job);
            }
            Err(SendError::RateLimited { retry_after }) => {
                tracing::warn!("job {} rate limited, retrying in {retry_after:?}", job.id);
                job.scheduled_for = now + to_chrono(retry_after);
                self.persist(&job);
            }
            Err(err) => match self.policy.decide(&err, job.attempts, job.max_attempts) {
                RetryDecision::Retry { delay } => {
                    job.attempts += 1;
                    tracing::warn!(
                        "job {} failed (attempt {}), retrying in {delay:?}: {err}",
                        job.id,
                        job.attempts
                    );
                    job.scheduled_for = now + to_chrono(delay);
                    self.persist(&job);
                }
                RetryDecision::GiveUp => {
                    tracing::error!("job {} failed terminally: {err}", job.id);
                    self.log(LogEntry::failure(&job, &err.to_string()));
                    self.remove(&job);
                }
            },
        }
    }

    fn persist(&self, job: &Job) {
        if let Err(e) = self.store.put(job) {
            tracing::error!("failed to persist job {}: {e}", job.id);
        }
    }

    fn remove(&self, job: &Job) {
        if let Err(e) = self.store.delete(&job.tenant_id, &job.id) {
            tracing::error!("failed to delete job {}: {e}", job.id);
        }
    }

    fn log(&self, entry: LogEntry) {
        if let Err(e) = self.store.append_log(&entry) {
            tracing::warn!("failed to append execution log: {e}");
        }
    }
}

fn to_chrono(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(30))
}

/// Lazily-spawned set of per-tenant scheduler actors.
pub struct SchedulerSet {
    store: Arc<JobStore>,
    registry: Arc<SenderRegistry>,
    policy: RetryPolicy,
    handles: tokio::sync::Mutex<HashMap<String, SchedulerHandle>>,
}

impl SchedulerSet {
    pub fn new(store: Arc<JobStore>, registry: Arc<SenderRegistry>, policy: RetryPolicy) -> Self {
        Self {
            store,
            registry,
            policy,
            handles: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Respawn an actor for every tenant with persisted jobs. Each
    /// actor re-arms its timer from storage, so pending work survives a
    /// process restart. Returns the number of tenants restored.
    pub async fn restore(&self) -> Result<usize> {
        let tenants = self.store.tenants_with_jobs()?;
        for tenant in &tenants {
            self.handle_for(tenant).await;
        }
        Ok(tenants.len())
    }

    /// Get or spawn the actor for a tenant.
    pub async fn handle_for(&self, tenant_id: &str) -> SchedulerHandle {
        let mut handles = self.handles.lock().await;
        handles
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                TenantScheduler::spawn(
                    tenant_id.to_string(),
                    self.store.clone(),
                    self.registry.clone(),
                    self.policy.clone(),
                )
            })
            .clone()
    }

    pub async fn schedule(&self, job: Job) -> Result<String> {
        let handle = self.handle_for(&job.tenant_id).await;
        handle.schedule(job).await
    }

    pub async fn cancel(&self, tenant_id: &str, job_id: &str) -> Result<bool> {
        let handle = self.handle_for(tenant_id).await;
        handle.cancel(job_id).await
    }
}
