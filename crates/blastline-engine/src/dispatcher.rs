//! Dispatcher — fans a `processing` campaign out into rate-budgeted sends.
//!
//! One send attempt per pending task, pulled in snapshot order. Each
//! platform gets a budget (max in-flight + minimum inter-send gap) because
//! channels throttle or ban accounts that send too fast. Transient failures
//! retry with capped exponential backoff; permanent failures settle the
//! task immediately. Every terminal outcome goes through a task-state CAS
//! in the store, so a task contributes to exactly one counter exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use blastline_core::config::DispatcherConfig;
use blastline_core::error::Result;
use blastline_core::types::{Campaign, CampaignStatus, Platform, RecipientTask};
use blastline_channels::{ChannelAdapter, SendError};
use blastline_store::CampaignDb;
use chrono::Utc;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Tasks fetched from the store per batch.
const BATCH_SIZE: usize = 64;

/// Per-(platform, sending identity) rate budget.
struct PlatformBudget {
    semaphore: Semaphore,
    last_send: Mutex<Instant>,
    min_gap: Duration,
    max_in_flight: usize,
}

impl PlatformBudget {
    fn new(max_in_flight: usize, min_gap: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_in_flight),
            last_send: Mutex::new(Instant::now() - min_gap),
            min_gap,
            max_in_flight,
        }
    }

    /// Acquire an in-flight slot and pace the send start.
    async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        // the semaphore is never closed
        let permit = self.semaphore.acquire().await.expect("budget semaphore closed");
        if !self.min_gap.is_zero() {
            let mut last = self.last_send.lock().await;
            let next_allowed = *last + self.min_gap;
            let now = Instant::now();
            if next_allowed > now {
                tokio::time::sleep(next_allowed - now).await;
            }
            *last = Instant::now();
        }
        permit
    }
}

/// The dispatcher. Cheap to clone behind an `Arc`; one instance serves all
/// campaigns.
pub struct Dispatcher {
    db: Arc<CampaignDb>,
    adapters: HashMap<Platform, Arc<dyn ChannelAdapter>>,
    config: DispatcherConfig,
    budgets: HashMap<Platform, PlatformBudget>,
}

impl Dispatcher {
    pub fn new(
        db: Arc<CampaignDb>,
        adapters: HashMap<Platform, Arc<dyn ChannelAdapter>>,
        config: DispatcherConfig,
    ) -> Self {
        let budgets = adapters
            .keys()
            .map(|&platform| {
                let budget = config.budget_for(platform);
                (
                    platform,
                    PlatformBudget::new(
                        budget.max_in_flight.max(1),
                        Duration::from_millis(budget.min_send_gap_ms),
                    ),
                )
            })
            .collect();
        Self {
            db,
            adapters,
            config,
            budgets,
        }
    }

    /// Drain a `processing` campaign: send every pending task, then run the
    /// completion check. Returns once the campaign has no dispatchable work
    /// left — settled, cancelled, or failed.
    pub async fn run_campaign(&self, campaign_id: &str) -> Result<()> {
        let campaign = self.db.get_campaign(campaign_id)?;
        let Some(adapter) = self.adapters.get(&campaign.platform) else {
            tracing::error!(
                "🚫 No adapter for {} — failing campaign {}",
                campaign.platform,
                campaign_id
            );
            self.db.mark_failed(
                campaign_id,
                &format!("No channel adapter configured for {}", campaign.platform),
                Utc::now(),
            )?;
            return Ok(());
        };
        let budget = &self.budgets[&campaign.platform];

        loop {
            // cancellation (or any terminal state) stops new work; in-flight
            // sends of the previous batch have already drained
            if self.db.campaign_status(campaign_id)? != CampaignStatus::Processing {
                tracing::info!("⏹️ Campaign {} left processing, stopping dispatch", campaign_id);
                return Ok(());
            }
            let batch = self.db.pending_tasks(campaign_id, BATCH_SIZE)?;
            if batch.is_empty() {
                break;
            }
            // snapshot order, bounded by the platform's in-flight budget
            futures::stream::iter(batch)
                .for_each_concurrent(budget.max_in_flight, |task| {
                    self.send_task(&campaign, adapter.as_ref(), budget, task)
                })
                .await;
        }

        if let Some(status) = self.db.try_complete(campaign_id, Utc::now())? {
            tracing::info!("🏁 Campaign {} -> {}", campaign_id, status);
        }
        Ok(())
    }

    /// Send one task to terminal state, absorbing per-task errors.
    async fn send_task(
        &self,
        campaign: &Campaign,
        adapter: &dyn ChannelAdapter,
        budget: &PlatformBudget,
        task: RecipientTask,
    ) {
        let mut attempts = task.attempts;
        loop {
            // re-check the cancellation flag right before each attempt; a
            // cancelled campaign leaves the task pending, never sent
            match self.db.campaign_status(&campaign.id) {
                Ok(CampaignStatus::Processing) => {}
                Ok(status) => {
                    tracing::debug!(
                        "Task {} abandoned pending: campaign {} is {}",
                        task.id,
                        campaign.id,
                        status
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Status check failed for {}: {e}", campaign.id);
                    return;
                }
            }

            let permit = budget.acquire().await;
            attempts += 1;
            let outcome = tokio::time::timeout(
                Duration::from_secs(self.config.send_timeout_secs),
                adapter.send(&task.recipient, &campaign.message),
            )
            .await
            .unwrap_or_else(|_| {
                Err(SendError::Transient(format!(
                    "Send attempt timed out after {}s",
                    self.config.send_timeout_secs
                )))
            });
            drop(permit);

            match outcome {
                Ok(provider_message_id) => {
                    match self.db.mark_task_sent(&task.id, &provider_message_id, attempts) {
                        Ok(true) => {
                            self.check_completion(&campaign.id);
                        }
                        Ok(false) => tracing::debug!(
                            "Task {} already settled, dropping duplicate send outcome",
                            task.id
                        ),
                        Err(e) => tracing::error!("⚠️ Failed to record send for {}: {e}", task.id),
                    }
                    return;
                }
                Err(SendError::Transient(reason)) if attempts < self.config.max_attempts => {
                    tracing::debug!(
                        "Task {} attempt {}/{} transient failure: {}",
                        task.id,
                        attempts,
                        self.config.max_attempts,
                        reason
                    );
                    if let Err(e) = self.db.record_attempt(&task.id, attempts, &reason) {
                        tracing::warn!("⚠️ Failed to record attempt for {}: {e}", task.id);
                    }
                    tokio::time::sleep(self.backoff_delay(attempts)).await;
                }
                Err(err) => {
                    let reason = match &err {
                        SendError::Transient(r) => format!("Retries exhausted: {r}"),
                        SendError::Permanent(r) => r.clone(),
                    };
                    match self.db.mark_task_failed(&task.id, &reason, attempts) {
                        Ok(true) => {
                            tracing::debug!("Task {} failed after {} attempts: {}", task.id, attempts, reason);
                            self.check_completion(&campaign.id);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!("⚠️ Failed to record failure for {}: {e}", task.id)
                        }
                    }
                    return;
                }
            }
        }
    }

    /// Exponential backoff with +/-20% jitter, capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms.max(1);
        let exp = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        let capped = exp.min(self.config.backoff_cap_ms.max(base));
        let jittered = rand::thread_rng().gen_range((capped * 4 / 5)..=(capped * 6 / 5));
        Duration::from_millis(jittered)
    }

    fn check_completion(&self, campaign_id: &str) {
        match self.db.try_complete(campaign_id, Utc::now()) {
            Ok(Some(status)) => {
                tracing::info!("🏁 Campaign {} -> {}", campaign_id, status);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Completion check failed for {}: {e}", campaign_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blastline_channels::SendResult;
    use blastline_core::types::{MessageSpec, RecipientPolicy, ScheduleType, TaskState};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Scripted adapter: per-recipient queues of outcomes, then success.
    struct MockAdapter {
        scripts: StdMutex<HashMap<String, VecDeque<SendResult<String>>>>,
        sends: StdMutex<Vec<String>>,
        /// Cancels this campaign as a side effect of the first send.
        cancel_on_first_send: Option<(Arc<CampaignDb>, String)>,
    }

    impl MockAdapter {
        fn new() -> Self {
            Self {
                scripts: StdMutex::new(HashMap::new()),
                sends: StdMutex::new(Vec::new()),
                cancel_on_first_send: None,
            }
        }

        fn script(&self, recipient: &str, outcomes: Vec<SendResult<String>>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(recipient.to_string(), outcomes.into());
        }

        fn sends(&self) -> Vec<String> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelAdapter for MockAdapter {
        fn platform(&self) -> Platform {
            Platform::WhatsApp
        }

        async fn send(&self, recipient: &str, _message: &MessageSpec) -> SendResult<String> {
            let attempt_no = {
                let mut sends = self.sends.lock().unwrap();
                sends.push(recipient.to_string());
                sends.len()
            };
            if attempt_no == 1 {
                if let Some((db, campaign_id)) = &self.cancel_on_first_send {
                    db.cancel_campaign(campaign_id, Utc::now()).unwrap();
                }
            }
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(recipient)
                .and_then(|q| q.pop_front());
            scripted.unwrap_or_else(|| Ok(format!("mock-{recipient}-{attempt_no}")))
        }
    }

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_cap_ms: 2,
            send_timeout_secs: 5,
            budgets: vec![blastline_core::config::RateBudgetConfig {
                platform: Platform::WhatsApp,
                max_in_flight: 1,
                min_send_gap_ms: 0,
            }],
        }
    }

    fn temp_db(name: &str) -> (Arc<CampaignDb>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("blastline-dispatch-test-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = Arc::new(CampaignDb::open(&dir.join("test.db")).unwrap());
        (db, dir)
    }

    /// Insert a processing campaign with a frozen snapshot.
    fn processing_campaign(db: &CampaignDb, recipients: &[&str]) -> Campaign {
        let c = Campaign::new(
            "o1",
            "promo",
            Platform::WhatsApp,
            MessageSpec::Text {
                body: "hello".into(),
            },
            RecipientPolicy::All,
            ScheduleType::Now,
            None,
        )
        .unwrap();
        db.insert_campaign(&c).unwrap();
        db.claim_for_processing(&c.id, Utc::now()).unwrap();
        let list: Vec<String> = recipients.iter().map(|r| r.to_string()).collect();
        db.freeze_snapshot(&c.id, &list).unwrap();
        c
    }

    fn dispatcher(db: Arc<CampaignDb>, adapter: Arc<MockAdapter>) -> Dispatcher {
        let mut adapters: HashMap<Platform, Arc<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(Platform::WhatsApp, adapter);
        Dispatcher::new(db, adapters, fast_config())
    }

    #[tokio::test]
    async fn test_all_sent_completes_campaign() {
        let (db, dir) = temp_db("allsent");
        let c = processing_campaign(&db, &["a", "b", "c"]);
        let adapter = Arc::new(MockAdapter::new());
        dispatcher(db.clone(), adapter.clone())
            .run_campaign(&c.id)
            .await
            .unwrap();

        let loaded = db.get_campaign(&c.id).unwrap();
        assert_eq!(loaded.status, CampaignStatus::Completed);
        assert_eq!(loaded.sent_count, 3);
        assert_eq!(loaded.failed_count, 0);
        assert_eq!(loaded.sent_count + loaded.failed_count, loaded.total_recipients);
        // snapshot order preserved under a serial budget
        assert_eq!(adapter.sends(), vec!["a", "b", "c"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_retry_then_fail_records_attempts() {
        let (db, dir) = temp_db("retryfail");
        let c = processing_campaign(&db, &["a"]);
        let adapter = Arc::new(MockAdapter::new());
        adapter.script(
            "a",
            vec![
                Err(SendError::Transient("timeout".into())),
                Err(SendError::Transient("rate limited".into())),
                Err(SendError::Transient("502".into())),
            ],
        );
        dispatcher(db.clone(), adapter.clone())
            .run_campaign(&c.id)
            .await
            .unwrap();

        let tasks = db.campaign_tasks(&c.id).unwrap();
        assert_eq!(tasks[0].state, TaskState::Failed);
        assert_eq!(tasks[0].attempts, 3);
        assert!(tasks[0].last_error.as_deref().unwrap().contains("502"));
        let loaded = db.get_campaign(&c.id).unwrap();
        assert_eq!(loaded.status, CampaignStatus::Failed);
        assert_eq!(loaded.failed_count, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let (db, dir) = temp_db("recover");
        let c = processing_campaign(&db, &["a"]);
        let adapter = Arc::new(MockAdapter::new());
        adapter.script(
            "a",
            vec![
                Err(SendError::Transient("timeout".into())),
                Ok("wamid.ok".into()),
            ],
        );
        dispatcher(db.clone(), adapter.clone())
            .run_campaign(&c.id)
            .await
            .unwrap();

        let tasks = db.campaign_tasks(&c.id).unwrap();
        assert_eq!(tasks[0].state, TaskState::Sent);
        assert_eq!(tasks[0].attempts, 2);
        assert_eq!(tasks[0].provider_message_id.as_deref(), Some("wamid.ok"));
        assert_eq!(db.get_campaign(&c.id).unwrap().status, CampaignStatus::Completed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_permanent_error_fails_without_retry() {
        let (db, dir) = temp_db("permanent");
        let c = processing_campaign(&db, &["a", "b"]);
        let adapter = Arc::new(MockAdapter::new());
        adapter.script("a", vec![Err(SendError::Permanent("invalid recipient".into()))]);
        dispatcher(db.clone(), adapter.clone())
            .run_campaign(&c.id)
            .await
            .unwrap();

        let tasks = db.campaign_tasks(&c.id).unwrap();
        assert_eq!(tasks[0].state, TaskState::Failed);
        assert_eq!(tasks[0].attempts, 1);
        assert_eq!(tasks[1].state, TaskState::Sent);
        // partial failure still completes the campaign
        let loaded = db.get_campaign(&c.id).unwrap();
        assert_eq!(loaded.status, CampaignStatus::Completed);
        assert_eq!(loaded.sent_count, 1);
        assert_eq!(loaded.failed_count, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_sends() {
        let (db, dir) = temp_db("cancelmid");
        let c = processing_campaign(&db, &["a", "b", "c"]);
        let mut adapter = MockAdapter::new();
        // cancellation lands while the first send is in flight
        adapter.cancel_on_first_send = Some((db.clone(), c.id.clone()));
        let adapter = Arc::new(adapter);
        dispatcher(db.clone(), adapter.clone())
            .run_campaign(&c.id)
            .await
            .unwrap();

        // the in-flight send completed and still counted
        let loaded = db.get_campaign(&c.id).unwrap();
        assert_eq!(loaded.status, CampaignStatus::Cancelled);
        assert_eq!(loaded.sent_count, 1);
        // nothing new started after the flag became visible
        assert_eq!(adapter.sends(), vec!["a"]);
        let tasks = db.campaign_tasks(&c.id).unwrap();
        assert_eq!(tasks[1].state, TaskState::Pending);
        assert_eq!(tasks[2].state, TaskState::Pending);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_campaign() {
        let (db, dir) = temp_db("noadapter");
        let c = processing_campaign(&db, &["a"]);
        let d = Dispatcher::new(db.clone(), HashMap::new(), fast_config());
        d.run_campaign(&c.id).await.unwrap();
        let loaded = db.get_campaign(&c.id).unwrap();
        assert_eq!(loaded.status, CampaignStatus::Failed);
        assert!(loaded.failure_reason.unwrap().contains("adapter"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
