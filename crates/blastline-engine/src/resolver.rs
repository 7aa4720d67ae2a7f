//! Recipient Resolver — expands a policy into a frozen, deduplicated set.
//!
//! Resolution is a pure read of the contact tables, called exactly once per
//! campaign at the moment of promotion. Because it never re-runs, the task
//! snapshot stays frozen no matter how group membership changes later.

use std::collections::HashSet;

use blastline_core::error::{BlastlineError, Result};
use blastline_core::types::{Platform, RecipientPolicy};
use blastline_store::CampaignDb;

/// Resolve a recipient policy into an ordered set of unique addresses.
///
/// Fails with a resolution error when the set comes out empty — a campaign
/// must never enter `processing` with zero recipients.
pub fn resolve(
    db: &CampaignDb,
    owner_id: &str,
    platform: Platform,
    policy: &RecipientPolicy,
) -> Result<Vec<String>> {
    let raw = match policy {
        RecipientPolicy::All => db.active_contact_addresses(owner_id, platform)?,
        RecipientPolicy::Groups(group_ids) => {
            db.group_member_addresses(owner_id, platform, group_ids)?
        }
        RecipientPolicy::Contacts(contact_ids) => {
            db.addresses_for_contacts(owner_id, platform, contact_ids)?
        }
    };

    // collapse duplicates to one task per physical address, keeping order
    let mut seen = HashSet::new();
    let recipients: Vec<String> = raw.into_iter().filter(|a| seen.insert(a.clone())).collect();

    if recipients.is_empty() {
        return Err(BlastlineError::RecipientResolution(format!(
            "Policy resolved to zero recipients on {platform}"
        )));
    }
    Ok(recipients)
}
