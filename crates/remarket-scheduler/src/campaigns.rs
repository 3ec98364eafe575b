//! Campaign, recipient, and bot credential storage.
//!
//! This is the relational side of a broadcast: the executor pulls
//! pending recipient batches from here, flips per-recipient statuses,
//! and bumps the campaign's aggregate counters. Row-level updates are
//! the only concurrency control needed since one campaign is only ever
//! driven by its owning tenant's scheduler actor.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use remarket_core::error::{RemarketError, Result};

/// Lifecycle of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignStatus {
    Draft,
    Running,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Draft,
        }
    }
}

/// Per-recipient delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
    Blocked,
    InvalidId,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::InvalidId => "invalid_id",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            "blocked" => Self::Blocked,
            "invalid_id" => Self::InvalidId,
            _ => Self::Pending,
        }
    }
}

/// A broadcast campaign and its aggregate counters.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub bot_id: String,
    pub name: String,
    pub message: String,
    pub status: CampaignStatus,
    pub total_recipients: u64,
    pub sent: u64,
    pub failed: u64,
    pub blocked: u64,
    pub invalid: u64,
}

/// One recipient row. `chat_id` is the resolved delivery address from
/// the joined customer record and may be absent.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: String,
    pub campaign_id: String,
    pub chat_id: Option<String>,
    pub status: RecipientStatus,
}

/// Sending-bot credentials.
#[derive(Debug, Clone)]
pub struct BotRow {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub token: String,
}

/// SQLite store for campaigns, recipients, and bot credentials.
pub struct CampaignDb {
    conn: Mutex<rusqlite::Connection>,
}

impl CampaignDb {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| RemarketError::Storage(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| RemarketError::Storage(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                token TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                message TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                total_recipients INTEGER NOT NULL DEFAULT 0,
                sent INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                blocked INTEGER NOT NULL DEFAULT 0,
                invalid INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recipients (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                chat_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_recipients_pending
                ON recipients (campaign_id, status);
         ",
            )
            .map_err(|e| RemarketError::Storage(format!("Migration: {e}")))?;
        Ok(())
    }

    // ─── Bots ─────────────────────────────────────────────────

    pub fn put_bot(&self, bot: &BotRow) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO bots (id, tenant_id, name, token, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    bot.id,
                    bot.tenant_id,
                    bot.name,
                    bot.token,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| RemarketError::Storage(format!("Save bot: {e}")))?;
        Ok(())
    }

    pub fn get_bot(&self, bot_id: &str) -> Result<Option<BotRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, tenant_id, name, token FROM bots WHERE id = ?1")
            .map_err(|e| RemarketError::Storage(format!("Get bot: {e}")))?;
        let bot = stmt
            .query_map([bot_id], |row| {
                Ok(BotRow {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    token: row.get(3)?,
                })
            })
            .map_err(|e| RemarketError::Storage(format!("Get bot: {e}")))?
            .filter_map(|r| r.ok())
            .next();
        Ok(bot)
    }

    // ─── Campaigns ────────────────────────────────────────────

    pub fn put_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO campaigns
                 (id, tenant_id, bot_id, name, message, status, total_recipients,
                  sent, failed, blocked, invalid, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    campaign.id,
                    campaign.tenant_id,
                    campaign.bot_id,
                    campaign.name,
                    campaign.message,
                    campaign.status.as_str(),
                    campaign.total_recipients,
                    campaign.sent,
                    campaign.failed,
                    campaign.blocked,
                    campaign.invalid,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| RemarketError::Storage(format!("Save campaign: {e}")))?;
        Ok(())
    }

    pub fn get_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant_id, bot_id, name, message, status, total_recipients,
                        sent, failed, blocked, invalid
                 FROM campaigns WHERE id = ?1",
            )
            .map_err(|e| RemarketError::Storage(format!("Get campaign: {e}")))?;
        let campaign = stmt
            .query_map([campaign_id], |row| {
                let status: String = row.get(5)?;
                Ok(Campaign {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    bot_id: row.get(2)?,
                    name: row.get(3)?,
                    message: row.get(4)?,
                    status: CampaignStatus::parse(&status),
                    total_recipients: row.get(6)?,
                    sent: row.get(7)?,
                    failed: row.get(8)?,
                    blocked: row.get(9)?,
                    invalid: row.get(10)?,
                })
            })
            .map_err(|e| RemarketError::Storage(format!("Get campaign: {e}")))?
            .filter_map(|r| r.ok())
            .next();
        Ok(campaign)
    }

    pub fn set_campaign_status(&self, campaign_id: &str, status: CampaignStatus) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET status = ?2 WHERE id = ?1",
                rusqlite::params![campaign_id, status.as_str()],
            )
            .map_err(|e| RemarketError::Storage(format!("Update campaign: {e}")))?;
        Ok(())
    }

    /// Bump exactly one aggregate counter to reflect a recipient
    /// outcome.
    pub fn bump_counter(&self, campaign_id: &str, status: RecipientStatus) -> Result<()> {
        let column = match status {
            RecipientStatus::Sent => "sent",
            RecipientStatus::Failed => "failed",
            RecipientStatus::Blocked => "blocked",
            RecipientStatus::InvalidId => "invalid",
            RecipientStatus::Pending => return Ok(()),
        };
        self.conn
            .lock()
            .unwrap()
            .execute(
                &format!("UPDATE campaigns SET {column} = {column} + 1 WHERE id = ?1"),
                [campaign_id],
            )
            .map_err(|e| RemarketError::Storage(format!("Bump counter: {e}")))?;
        Ok(())
    }

    // ─── Recipients ───────────────────────────────────────────

    /// Add a recipient and bump the campaign's total. Re-adding an
    /// existing id rewrites the row without counting it twice.
    pub fn add_recipient(&self, recipient: &Recipient) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let existed: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM recipients WHERE id = ?1)",
                [&recipient.id],
                |row| row.get(0),
            )
            .map_err(|e| RemarketError::Storage(format!("Save recipient: {e}")))?;
        conn.execute(
            "INSERT OR REPLACE INTO recipients (id, campaign_id, chat_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                recipient.id,
                recipient.campaign_id,
                recipient.chat_id,
                recipient.status.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| RemarketError::Storage(format!("Save recipient: {e}")))?;
        if !existed {
            conn.execute(
                "UPDATE campaigns SET total_recipients = total_recipients + 1 WHERE id = ?1",
                [&recipient.campaign_id],
            )
            .map_err(|e| RemarketError::Storage(format!("Save recipient: {e}")))?;
        }
        Ok(())
    }

    /// Up to `limit` recipients still pending for a campaign.
    pub fn pending_recipients(&self, campaign_id: &str, limit: u32) -> Result<Vec<Recipient>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, campaign_id, chat_id, status FROM recipients
                 WHERE campaign_id = ?1 AND status = 'pending'
                 ORDER BY id LIMIT ?2",
            )
            .map_err(|e| RemarketError::Storage(format!("List recipients: {e}")))?;
        let recipients = stmt
            .query_map(rusqlite::params![campaign_id, limit], |row| {
                let status: String = row.get(3)?;
                Ok(Recipient {
                    id: row.get(0)?,
                    campaign_id: row.get(1)?,
                    chat_id: row.get(2)?,
                    status: RecipientStatus::parse(&status),
                })
            })
            .map_err(|e| RemarketError::Storage(format!("List recipients: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(recipients)
    }

    pub fn pending_count(&self, campaign_id: &str) -> Result<u64> {
        let count: u64 = self
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM recipients
                 WHERE campaign_id = ?1 AND status = 'pending'",
                [campaign_id],
                |row| row.get(0),
            )
            .map_err(|e| RemarketError::Storage(format!("Count recipients: {e}")))?;
        Ok(count)
    }

    pub fn set_recipient_status(&self, recipient_id: &str, status: RecipientStatus) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE recipients SET status = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![recipient_id, status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(|e| RemarketError::Storage(format!("Update recipient: {e}")))?;
        Ok(())
    }
}
