//! Campaign database — SQLite behind a mutex, WAL mode.

use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use blastline_core::error::{BlastlineError, Result};
use blastline_core::types::{
    Campaign, CampaignStatus, MessageSpec, Platform, RecipientPolicy, RecipientTask, ScheduleType,
    TaskState,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

/// Outcome of folding one receipt into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptApply {
    /// The transition happened and counters moved.
    Applied,
    /// Already in that state (or past it) — redelivered webhook, no-op.
    Duplicate,
    /// No task carries this provider message id.
    Unknown,
}

/// Campaign database handle. Cheap to share behind an `Arc`.
pub struct CampaignDb {
    conn: Mutex<Connection>,
}

impl CampaignDb {
    /// Open or create the campaign database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .map_err(|e| BlastlineError::Store(format!("DB open: {e}")))?;
        // WAL for concurrent readers while a writer holds the mutex
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        tracing::debug!("💾 Campaign store ready: {}", path.display());
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                platform TEXT NOT NULL,
                message TEXT NOT NULL,           -- JSON MessageSpec
                policy TEXT NOT NULL,            -- JSON RecipientPolicy
                schedule_type TEXT NOT NULL,     -- 'now' | 'scheduled'
                scheduled_at TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                failure_reason TEXT,
                total_recipients INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                delivered_count INTEGER NOT NULL DEFAULT 0,
                read_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            -- Frozen per-recipient snapshot, written once at promotion
            CREATE TABLE IF NOT EXISTS recipient_tasks (
                id TEXT PRIMARY KEY,
                campaign_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                provider_message_id TEXT,
                position INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (campaign_id) REFERENCES campaigns(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_pending
                ON recipient_tasks (campaign_id, state, position);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_provider_id
                ON recipient_tasks (provider_message_id)
                WHERE provider_message_id IS NOT NULL;

            -- Contact read side, owned by the contact-management collaborator
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                platform TEXT NOT NULL,
                address TEXT NOT NULL,
                display_name TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS contact_groups (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                PRIMARY KEY (group_id, contact_id)
            );
            ",
        )
        .map_err(|e| BlastlineError::Store(format!("Migration: {e}")))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BlastlineError::Store(format!("Lock poisoned: {e}")))
    }

    // ─── Campaigns ──────────────────────────────────────

    /// Persist a newly submitted campaign.
    pub fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO campaigns
             (id, owner_id, name, platform, message, policy, schedule_type, scheduled_at,
              status, failure_reason, total_recipients, sent_count, delivered_count,
              read_count, failed_count, created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                campaign.id,
                campaign.owner_id,
                campaign.name,
                campaign.platform.as_str(),
                serde_json::to_string(&campaign.message)?,
                serde_json::to_string(&campaign.policy)?,
                match campaign.schedule_type {
                    ScheduleType::Now => "now",
                    ScheduleType::Scheduled => "scheduled",
                },
                campaign.scheduled_at.map(|t| t.to_rfc3339()),
                campaign.status.as_str(),
                campaign.failure_reason,
                campaign.total_recipients,
                campaign.sent_count,
                campaign.delivered_count,
                campaign.read_count,
                campaign.failed_count,
                campaign.created_at.to_rfc3339(),
                campaign.started_at.map(|t| t.to_rfc3339()),
                campaign.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| BlastlineError::Store(format!("Insert campaign: {e}")))?;
        Ok(())
    }

    /// Load one campaign.
    pub fn get_campaign(&self, id: &str) -> Result<Campaign> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, owner_id, name, platform, message, policy, schedule_type, scheduled_at,
                    status, failure_reason, total_recipients, sent_count, delivered_count,
                    read_count, failed_count, created_at, started_at, completed_at
             FROM campaigns WHERE id = ?1",
            [id],
            row_to_campaign,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => BlastlineError::NotFound(id.to_string()),
            other => BlastlineError::Store(format!("Get campaign: {other}")),
        })
    }

    /// List an owner's campaigns, newest first.
    pub fn list_campaigns(&self, owner_id: &str) -> Result<Vec<Campaign>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, owner_id, name, platform, message, policy, schedule_type, scheduled_at,
                        status, failure_reason, total_recipients, sent_count, delivered_count,
                        read_count, failed_count, created_at, started_at, completed_at
                 FROM campaigns WHERE owner_id = ?1 ORDER BY created_at DESC",
            )
            .map_err(|e| BlastlineError::Store(format!("List campaigns: {e}")))?;
        let rows = stmt
            .query_map([owner_id], row_to_campaign)
            .map_err(|e| BlastlineError::Store(format!("List campaigns: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BlastlineError::Store(format!("List campaigns: {e}")))
    }

    /// Campaign ids eligible for promotion: `scheduled` past its start time,
    /// or `draft` submitted for immediate dispatch. Creation order.
    pub fn due_campaign_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id FROM campaigns
                 WHERE (status = 'scheduled' AND scheduled_at <= ?1)
                    OR (status = 'draft' AND schedule_type = 'now')
                 ORDER BY created_at",
            )
            .map_err(|e| BlastlineError::Store(format!("Due query: {e}")))?;
        let rows = stmt
            .query_map([now.to_rfc3339()], |row| row.get::<_, String>(0))
            .map_err(|e| BlastlineError::Store(format!("Due query: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BlastlineError::Store(format!("Due query: {e}")))
    }

    /// Atomic promotion claim: `{draft, scheduled} -> processing`.
    ///
    /// Returns true iff this caller won the compare-and-swap. Overlapping
    /// sweeps all call this; losers must no-op.
    pub fn claim_for_processing(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET status = 'processing', started_at = ?2
                 WHERE id = ?1 AND status IN ('draft', 'scheduled')",
                params![id, now.to_rfc3339()],
            )
            .map_err(|e| BlastlineError::Store(format!("Claim: {e}")))?;
        Ok(changed == 1)
    }

    /// Persist the frozen recipient snapshot and `total_recipients` in one
    /// transaction. The set never changes afterward, whatever happens to
    /// the underlying contacts or groups.
    pub fn freeze_snapshot(&self, campaign_id: &str, recipients: &[String]) -> Result<u32> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Snapshot tx: {e}")))?;
        let now = Utc::now().to_rfc3339();
        for (position, recipient) in recipients.iter().enumerate() {
            let task = RecipientTask::new(campaign_id, recipient, position as u32);
            tx.execute(
                "INSERT INTO recipient_tasks
                 (id, campaign_id, recipient, state, attempts, position, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5)",
                params![task.id, task.campaign_id, task.recipient, task.position, now],
            )
            .map_err(|e| BlastlineError::Store(format!("Snapshot insert: {e}")))?;
        }
        tx.execute(
            "UPDATE campaigns SET total_recipients = ?2 WHERE id = ?1",
            params![campaign_id, recipients.len() as u32],
        )
        .map_err(|e| BlastlineError::Store(format!("Snapshot total: {e}")))?;
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Snapshot commit: {e}")))?;
        Ok(recipients.len() as u32)
    }

    /// Force a campaign to `failed` with a recorded reason (resolution
    /// failure path — a campaign must never sit in `processing` with zero
    /// tasks).
    pub fn mark_failed(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE campaigns SET status = 'failed', failure_reason = ?2, completed_at = ?3
             WHERE id = ?1 AND status IN ('draft', 'scheduled', 'processing')",
            params![id, reason, now.to_rfc3339()],
        )
        .map_err(|e| BlastlineError::Store(format!("Mark failed: {e}")))?;
        Ok(())
    }

    /// Current status only — cheap cancellation-flag check for dispatch.
    pub fn campaign_status(&self, id: &str) -> Result<CampaignStatus> {
        let conn = self.lock()?;
        let status: String = conn
            .query_row("SELECT status FROM campaigns WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => BlastlineError::NotFound(id.to_string()),
                other => BlastlineError::Store(format!("Status: {other}")),
            })?;
        CampaignStatus::from_str(&status)
    }

    /// Cancellation CAS: `{scheduled, processing} -> cancelled`.
    ///
    /// An already-terminal campaign yields `InvalidTransition` — reported to
    /// the caller, never silently swallowed.
    pub fn cancel_campaign(&self, id: &str, now: DateTime<Utc>) -> Result<CampaignStatus> {
        let from = self.campaign_status(id)?;
        if !from.can_transition_to(CampaignStatus::Cancelled) {
            return Err(BlastlineError::InvalidTransition {
                from,
                to: CampaignStatus::Cancelled,
            });
        }
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE campaigns SET status = 'cancelled', completed_at = ?2
                 WHERE id = ?1 AND status IN ('scheduled', 'processing')",
                params![id, now.to_rfc3339()],
            )
            .map_err(|e| BlastlineError::Store(format!("Cancel: {e}")))?;
        if changed == 1 {
            Ok(CampaignStatus::Cancelled)
        } else {
            Err(BlastlineError::InvalidTransition {
                from,
                to: CampaignStatus::Cancelled,
            })
        }
    }

    /// Completion check: once every task is send-terminal, decide the
    /// campaign. `completed` if anything was sent, `failed` if every send
    /// failed. CAS on `processing` makes re-checks no-ops.
    pub fn try_complete(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CampaignStatus>> {
        let conn = self.lock()?;
        let counters = conn
            .query_row(
                "SELECT total_recipients, sent_count, failed_count
                 FROM campaigns WHERE id = ?1 AND status = 'processing'",
                [campaign_id],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                // not processing (already terminal) or gone — nothing to decide
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(BlastlineError::Store(format!("Completion read: {other}"))),
            })?;
        let Some((total, sent, failed)) = counters else {
            return Ok(None);
        };
        if total == 0 || sent + failed < total {
            return Ok(None);
        }

        let target = if sent > 0 {
            CampaignStatus::Completed
        } else {
            CampaignStatus::Failed
        };
        let changed = conn
            .execute(
                "UPDATE campaigns SET status = ?2, completed_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![campaign_id, target.as_str(), now.to_rfc3339()],
            )
            .map_err(|e| BlastlineError::Store(format!("Completion: {e}")))?;
        Ok((changed == 1).then_some(target))
    }

    // ─── Recipient tasks ──────────────────────────────────────

    /// Pending tasks for a campaign in snapshot order.
    pub fn pending_tasks(&self, campaign_id: &str, limit: usize) -> Result<Vec<RecipientTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, campaign_id, recipient, state, attempts, last_error,
                        provider_message_id, position, updated_at
                 FROM recipient_tasks
                 WHERE campaign_id = ?1 AND state = 'pending'
                 ORDER BY position LIMIT ?2",
            )
            .map_err(|e| BlastlineError::Store(format!("Pending tasks: {e}")))?;
        let rows = stmt
            .query_map(params![campaign_id, limit as i64], row_to_task)
            .map_err(|e| BlastlineError::Store(format!("Pending tasks: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BlastlineError::Store(format!("Pending tasks: {e}")))
    }

    /// All tasks for a campaign in snapshot order.
    pub fn campaign_tasks(&self, campaign_id: &str) -> Result<Vec<RecipientTask>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, campaign_id, recipient, state, attempts, last_error,
                        provider_message_id, position, updated_at
                 FROM recipient_tasks WHERE campaign_id = ?1 ORDER BY position",
            )
            .map_err(|e| BlastlineError::Store(format!("Tasks: {e}")))?;
        let rows = stmt
            .query_map([campaign_id], row_to_task)
            .map_err(|e| BlastlineError::Store(format!("Tasks: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BlastlineError::Store(format!("Tasks: {e}")))
    }

    /// Terminal send success: task CAS `pending -> sent` plus `sent_count`
    /// in one transaction. The CAS guard means a task contributes to exactly
    /// one counter exactly once, however many workers race.
    pub fn mark_task_sent(
        &self,
        task_id: &str,
        provider_message_id: &str,
        attempts: u32,
    ) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Sent tx: {e}")))?;
        let changed = tx
            .execute(
                "UPDATE recipient_tasks
                 SET state = 'sent', provider_message_id = ?2, attempts = ?3,
                     last_error = NULL, updated_at = ?4
                 WHERE id = ?1 AND state = 'pending'",
                params![task_id, provider_message_id, attempts, Utc::now().to_rfc3339()],
            )
            .map_err(|e| BlastlineError::Store(format!("Mark sent: {e}")))?;
        if changed == 1 {
            tx.execute(
                "UPDATE campaigns SET sent_count = sent_count + 1
                 WHERE id = (SELECT campaign_id FROM recipient_tasks WHERE id = ?1)",
                [task_id],
            )
            .map_err(|e| BlastlineError::Store(format!("Sent counter: {e}")))?;
        }
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Sent commit: {e}")))?;
        Ok(changed == 1)
    }

    /// Terminal send failure: task CAS `pending -> failed` plus
    /// `failed_count`, same single-writer guarantee as `mark_task_sent`.
    pub fn mark_task_failed(&self, task_id: &str, error: &str, attempts: u32) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Failed tx: {e}")))?;
        let changed = tx
            .execute(
                "UPDATE recipient_tasks
                 SET state = 'failed', last_error = ?2, attempts = ?3, updated_at = ?4
                 WHERE id = ?1 AND state = 'pending'",
                params![task_id, error, attempts, Utc::now().to_rfc3339()],
            )
            .map_err(|e| BlastlineError::Store(format!("Mark failed: {e}")))?;
        if changed == 1 {
            tx.execute(
                "UPDATE campaigns SET failed_count = failed_count + 1
                 WHERE id = (SELECT campaign_id FROM recipient_tasks WHERE id = ?1)",
                [task_id],
            )
            .map_err(|e| BlastlineError::Store(format!("Failed counter: {e}")))?;
        }
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Failed commit: {e}")))?;
        Ok(changed == 1)
    }

    /// Record a retry in progress without changing state.
    pub fn record_attempt(&self, task_id: &str, attempts: u32, error: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE recipient_tasks SET attempts = ?2, last_error = ?3, updated_at = ?4
             WHERE id = ?1 AND state = 'pending'",
            params![task_id, attempts, error, Utc::now().to_rfc3339()],
        )
        .map_err(|e| BlastlineError::Store(format!("Record attempt: {e}")))?;
        Ok(())
    }

    // ─── Receipt folding ──────────────────────────────────────

    /// Delivered receipt: `sent -> delivered`, bumps `delivered_count`.
    pub fn apply_delivered(&self, provider_message_id: &str) -> Result<ReceiptApply> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Receipt tx: {e}")))?;
        let Some((task_id, campaign_id, state)) = task_by_provider_id(&tx, provider_message_id)?
        else {
            return Ok(ReceiptApply::Unknown);
        };
        if state != TaskState::Sent {
            return Ok(ReceiptApply::Duplicate);
        }
        cas_task_state(&tx, &task_id, TaskState::Sent, TaskState::Delivered)?;
        tx.execute(
            "UPDATE campaigns SET delivered_count = delivered_count + 1 WHERE id = ?1",
            [&campaign_id],
        )
        .map_err(|e| BlastlineError::Store(format!("Delivered counter: {e}")))?;
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Receipt commit: {e}")))?;
        Ok(ReceiptApply::Applied)
    }

    /// Read receipt: `delivered -> read`, or `sent -> read` which implies
    /// delivery and upgrades both counters without double counting.
    pub fn apply_read(&self, provider_message_id: &str) -> Result<ReceiptApply> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Receipt tx: {e}")))?;
        let Some((task_id, campaign_id, state)) = task_by_provider_id(&tx, provider_message_id)?
        else {
            return Ok(ReceiptApply::Unknown);
        };
        match state {
            TaskState::Delivered => {
                cas_task_state(&tx, &task_id, TaskState::Delivered, TaskState::Read)?;
                tx.execute(
                    "UPDATE campaigns SET read_count = read_count + 1 WHERE id = ?1",
                    [&campaign_id],
                )
                .map_err(|e| BlastlineError::Store(format!("Read counter: {e}")))?;
            }
            TaskState::Sent => {
                cas_task_state(&tx, &task_id, TaskState::Sent, TaskState::Read)?;
                tx.execute(
                    "UPDATE campaigns
                     SET delivered_count = delivered_count + 1, read_count = read_count + 1
                     WHERE id = ?1",
                    [&campaign_id],
                )
                .map_err(|e| BlastlineError::Store(format!("Read counter: {e}")))?;
            }
            _ => return Ok(ReceiptApply::Duplicate),
        }
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Receipt commit: {e}")))?;
        Ok(ReceiptApply::Applied)
    }

    /// Failed receipt after a successful send: `sent -> failed`, moving one
    /// unit from `sent_count` to `failed_count` so conservation holds. Tasks
    /// the provider already reported delivered or read are left alone.
    pub fn apply_failed_receipt(&self, provider_message_id: &str) -> Result<ReceiptApply> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| BlastlineError::Store(format!("Receipt tx: {e}")))?;
        let Some((task_id, campaign_id, state)) = task_by_provider_id(&tx, provider_message_id)?
        else {
            return Ok(ReceiptApply::Unknown);
        };
        if state != TaskState::Sent {
            return Ok(ReceiptApply::Duplicate);
        }
        cas_task_state(&tx, &task_id, TaskState::Sent, TaskState::Failed)?;
        tx.execute(
            "UPDATE recipient_tasks SET last_error = 'reported failed by provider' WHERE id = ?1",
            [&task_id],
        )
        .map_err(|e| BlastlineError::Store(format!("Receipt error note: {e}")))?;
        tx.execute(
            "UPDATE campaigns
             SET sent_count = sent_count - 1, failed_count = failed_count + 1
             WHERE id = ?1",
            [&campaign_id],
        )
        .map_err(|e| BlastlineError::Store(format!("Failed-receipt counter: {e}")))?;
        tx.commit()
            .map_err(|e| BlastlineError::Store(format!("Receipt commit: {e}")))?;
        Ok(ReceiptApply::Applied)
    }
}

/// Look up (task id, campaign id, state) by provider message id.
fn task_by_provider_id(
    tx: &rusqlite::Transaction<'_>,
    provider_message_id: &str,
) -> Result<Option<(String, String, TaskState)>> {
    let row = tx
        .query_row(
            "SELECT id, campaign_id, state FROM recipient_tasks WHERE provider_message_id = ?1",
            [provider_message_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(BlastlineError::Store(format!("Task lookup: {other}"))),
        })?;
    match row {
        Some((id, campaign_id, state)) => Ok(Some((id, campaign_id, TaskState::from_str(&state)?))),
        None => Ok(None),
    }
}

fn cas_task_state(
    tx: &rusqlite::Transaction<'_>,
    task_id: &str,
    from: TaskState,
    to: TaskState,
) -> Result<()> {
    let changed = tx
        .execute(
            "UPDATE recipient_tasks SET state = ?3, updated_at = ?4
             WHERE id = ?1 AND state = ?2",
            params![task_id, from.as_str(), to.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| BlastlineError::Store(format!("Task CAS: {e}")))?;
    if changed != 1 {
        // the state was re-read inside this transaction, so this is a bug
        return Err(BlastlineError::Store(format!(
            "Task CAS lost for {task_id}: {from:?} -> {to:?}"
        )));
    }
    Ok(())
}

fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    let platform: String = row.get(3)?;
    let message: String = row.get(4)?;
    let policy: String = row.get(5)?;
    let schedule_type: String = row.get(6)?;
    let status: String = row.get(8)?;
    Ok(Campaign {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        platform: Platform::from_str(&platform).map_err(|_| invalid_column(3))?,
        message: serde_json::from_str::<MessageSpec>(&message).map_err(|_| invalid_column(4))?,
        policy: serde_json::from_str::<RecipientPolicy>(&policy).map_err(|_| invalid_column(5))?,
        schedule_type: match schedule_type.as_str() {
            "now" => ScheduleType::Now,
            _ => ScheduleType::Scheduled,
        },
        scheduled_at: parse_ts(row.get::<_, Option<String>>(7)?),
        status: CampaignStatus::from_str(&status).map_err(|_| invalid_column(8))?,
        failure_reason: row.get(9)?,
        total_recipients: row.get(10)?,
        sent_count: row.get(11)?,
        delivered_count: row.get(12)?,
        read_count: row.get(13)?,
        failed_count: row.get(14)?,
        created_at: parse_ts(row.get::<_, Option<String>>(15)?).unwrap_or_else(Utc::now),
        started_at: parse_ts(row.get::<_, Option<String>>(16)?),
        completed_at: parse_ts(row.get::<_, Option<String>>(17)?),
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecipientTask> {
    let state: String = row.get(3)?;
    Ok(RecipientTask {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        recipient: row.get(2)?,
        state: TaskState::from_str(&state).map_err(|_| invalid_column(3))?,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        provider_message_id: row.get(6)?,
        position: row.get(7)?,
        updated_at: parse_ts(row.get::<_, Option<String>>(8)?).unwrap_or_else(Utc::now),
    })
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn invalid_column(idx: usize) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, "corrupt column".into(), rusqlite::types::Type::Text)
}
