//! Scheduler sweep — the periodic tick that promotes due campaigns.
//!
//! Each tick scans for due work (`now` campaigns still in draft, plus
//! scheduled campaigns whose time has arrived) and pushes each one through
//! the same pipeline: CAS claim, recipient resolution, snapshot freeze,
//! dispatch spawn. The CAS claim makes overlapping sweeps harmless — only
//! one caller wins the promotion, everyone else moves on.

use std::sync::Arc;
use std::time::Duration;

use blastline_core::error::Result;
use blastline_store::CampaignDb;
use chrono::{DateTime, Utc};

use crate::dispatcher::Dispatcher;
use crate::resolver;

pub struct SchedulerSweep {
    db: Arc<CampaignDb>,
    dispatcher: Arc<Dispatcher>,
}

impl SchedulerSweep {
    pub fn new(db: Arc<CampaignDb>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { db, dispatcher }
    }

    /// One sweep pass. Returns how many campaigns this call promoted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.db.due_campaign_ids(now)?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::debug!("📅 Sweep found {} due campaign(s)", due.len());

        let mut promoted = 0;
        for campaign_id in due {
            if self.promote(&campaign_id, now).await? {
                promoted += 1;
            }
        }
        if promoted > 0 {
            tracing::info!("🔔 Sweep promoted {} campaign(s)", promoted);
        }
        Ok(promoted)
    }

    /// Claim, resolve, freeze, and hand one campaign to the dispatcher.
    async fn promote(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<bool> {
        // CAS claim: losing the race (or a concurrent cancel) is not an error
        if !self.db.claim_for_processing(campaign_id, now)? {
            tracing::debug!("Campaign {} already claimed, skipping", campaign_id);
            return Ok(false);
        }

        let campaign = self.db.get_campaign(campaign_id)?;
        let recipients = match resolver::resolve(
            &self.db,
            &campaign.owner_id,
            campaign.platform,
            &campaign.policy,
        ) {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!("⚠️ Campaign {} failed resolution: {e}", campaign_id);
                self.db.mark_failed(campaign_id, &e.to_string(), now)?;
                return Ok(false);
            }
        };

        self.db.freeze_snapshot(campaign_id, &recipients)?;
        tracing::info!(
            "✅ Campaign {} promoted with {} recipient(s) on {}",
            campaign_id,
            recipients.len(),
            campaign.platform
        );

        let dispatcher = self.dispatcher.clone();
        let id = campaign_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.run_campaign(&id).await {
                tracing::error!("⚠️ Dispatch of campaign {} aborted: {e}", id);
            }
        });
        Ok(true)
    }
}

/// Spawn the background sweep loop at a fixed interval.
pub fn spawn_sweep(sweep: Arc<SchedulerSweep>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("📅 Scheduler sweep started (every {}s)", interval_secs);
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep.run_once(Utc::now()).await {
                tracing::error!("⚠️ Sweep pass failed: {e}");
            }
        }
    })
}
