//! Best-effort cancellation.
//!
//! Cancellation is a single CAS in the store. The dispatcher observes the
//! flipped status between attempts and abandons remaining pending tasks;
//! anything already handed to a provider stays sent and keeps accepting
//! receipts.

use blastline_core::error::Result;
use blastline_store::CampaignDb;
use chrono::{DateTime, Utc};

/// Cancel a campaign in `scheduled` or `processing`. Terminal and draft
/// campaigns reject the transition.
pub fn cancel_campaign(db: &CampaignDb, campaign_id: &str, now: DateTime<Utc>) -> Result<()> {
    db.cancel_campaign(campaign_id, now)?;
    tracing::info!("🛑 Campaign {} cancelled", campaign_id);
    Ok(())
}
