//! Contact read side.
//!
//! Contacts and groups are owned by the contact-management collaborator;
//! the engine only reads them during recipient resolution. The write
//! helpers here exist for that collaborator (and the tests) to seed data.

use blastline_core::error::{BlastlineError, Result};
use blastline_core::types::Platform;
use chrono::Utc;
use rusqlite::params;

use crate::db::CampaignDb;

/// A messaging contact for one owner on one platform.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Contact {
    pub id: String,
    pub owner_id: String,
    pub platform: Platform,
    /// Platform-specific address (phone number, chat id, PSID).
    pub address: String,
    pub display_name: String,
    pub active: bool,
}

impl Contact {
    pub fn new(owner_id: &str, platform: Platform, address: &str, display_name: &str) -> Self {
        Self {
            id: format!("ct-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            platform,
            address: address.to_string(),
            display_name: display_name.to_string(),
            active: true,
        }
    }
}

/// A named contact group.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContactGroup {
    pub id: String,
    pub owner_id: String,
    pub name: String,
}

impl CampaignDb {
    /// Insert or replace a contact.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO contacts
             (id, owner_id, platform, address, display_name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                contact.id,
                contact.owner_id,
                contact.platform.as_str(),
                contact.address,
                contact.display_name,
                contact.active as i32,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| BlastlineError::Store(format!("Upsert contact: {e}")))?;
        Ok(())
    }

    /// Create a contact group.
    pub fn create_group(&self, owner_id: &str, name: &str) -> Result<ContactGroup> {
        let group = ContactGroup {
            id: format!("grp-{}", uuid::Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO contact_groups (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![group.id, group.owner_id, group.name, Utc::now().to_rfc3339()],
        )
        .map_err(|e| BlastlineError::Store(format!("Create group: {e}")))?;
        Ok(group)
    }

    /// Add a contact to a group. Re-adding is a no-op.
    pub fn add_group_member(&self, group_id: &str, contact_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, contact_id) VALUES (?1, ?2)",
            params![group_id, contact_id],
        )
        .map_err(|e| BlastlineError::Store(format!("Add member: {e}")))?;
        Ok(())
    }

    /// Remove a contact from a group.
    pub fn remove_group_member(&self, group_id: &str, contact_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND contact_id = ?2",
            params![group_id, contact_id],
        )
        .map_err(|e| BlastlineError::Store(format!("Remove member: {e}")))?;
        Ok(())
    }

    /// Addresses of every active contact for an owner on a platform,
    /// in contact creation order.
    pub fn active_contact_addresses(
        &self,
        owner_id: &str,
        platform: Platform,
    ) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT address FROM contacts
                 WHERE owner_id = ?1 AND platform = ?2 AND active = 1
                 ORDER BY created_at, id",
            )
            .map_err(|e| BlastlineError::Store(format!("Contacts: {e}")))?;
        let rows = stmt
            .query_map(params![owner_id, platform.as_str()], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| BlastlineError::Store(format!("Contacts: {e}")))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| BlastlineError::Store(format!("Contacts: {e}")))
    }

    /// Addresses of active contacts belonging to any of the listed groups,
    /// in membership order. Cross-group duplicates are returned as-is; the
    /// resolver collapses them.
    pub fn group_member_addresses(
        &self,
        owner_id: &str,
        platform: Platform,
        group_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut addresses = Vec::new();
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.address FROM group_members gm
                 JOIN contacts c ON c.id = gm.contact_id
                 WHERE gm.group_id = ?1 AND c.owner_id = ?2
                   AND c.platform = ?3 AND c.active = 1
                 ORDER BY c.created_at, c.id",
            )
            .map_err(|e| BlastlineError::Store(format!("Group members: {e}")))?;
        for group_id in group_ids {
            let rows = stmt
                .query_map(params![group_id, owner_id, platform.as_str()], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| BlastlineError::Store(format!("Group members: {e}")))?;
            for row in rows {
                addresses
                    .push(row.map_err(|e| BlastlineError::Store(format!("Group members: {e}")))?);
            }
        }
        Ok(addresses)
    }

    /// Addresses for an explicit contact id list, preserving list order.
    /// Unknown, inactive, or wrong-platform ids are skipped.
    pub fn addresses_for_contacts(
        &self,
        owner_id: &str,
        platform: Platform,
        contact_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut addresses = Vec::new();
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT address FROM contacts
                 WHERE id = ?1 AND owner_id = ?2 AND platform = ?3 AND active = 1",
            )
            .map_err(|e| BlastlineError::Store(format!("Contact lookup: {e}")))?;
        for contact_id in contact_ids {
            let address = stmt
                .query_row(params![contact_id, owner_id, platform.as_str()], |row| {
                    row.get::<_, String>(0)
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(BlastlineError::Store(format!("Contact lookup: {other}"))),
                })?;
            if let Some(address) = address {
                addresses.push(address);
            }
        }
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(name: &str) -> (CampaignDb, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("blastline-contacts-test-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = CampaignDb::open(&dir.join("test.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_active_filter_and_platform_scope() {
        let (db, dir) = temp_db("scope");
        let a = Contact::new("o1", Platform::WhatsApp, "111", "A");
        let mut b = Contact::new("o1", Platform::WhatsApp, "222", "B");
        b.active = false;
        let c = Contact::new("o1", Platform::Telegram, "333", "C");
        let d = Contact::new("o2", Platform::WhatsApp, "444", "D");
        for contact in [&a, &b, &c, &d] {
            db.upsert_contact(contact).unwrap();
        }
        let addresses = db.active_contact_addresses("o1", Platform::WhatsApp).unwrap();
        assert_eq!(addresses, vec!["111".to_string()]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_group_members_across_groups() {
        let (db, dir) = temp_db("groups");
        let x = Contact::new("o1", Platform::WhatsApp, "111", "X");
        let y = Contact::new("o1", Platform::WhatsApp, "222", "Y");
        db.upsert_contact(&x).unwrap();
        db.upsert_contact(&y).unwrap();
        let g1 = db.create_group("o1", "vip").unwrap();
        let g2 = db.create_group("o1", "all-hands").unwrap();
        db.add_group_member(&g1.id, &x.id).unwrap();
        db.add_group_member(&g2.id, &x.id).unwrap();
        db.add_group_member(&g2.id, &y.id).unwrap();

        let addresses = db
            .group_member_addresses("o1", Platform::WhatsApp, &[g1.id.clone(), g2.id.clone()])
            .unwrap();
        // raw union keeps the cross-group duplicate; dedup is the resolver's job
        assert_eq!(addresses, vec!["111", "111", "222"]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_removed_member_leaves_group() {
        let (db, dir) = temp_db("remove");
        let x = Contact::new("o1", Platform::WhatsApp, "111", "X");
        let y = Contact::new("o1", Platform::WhatsApp, "222", "Y");
        db.upsert_contact(&x).unwrap();
        db.upsert_contact(&y).unwrap();
        let g = db.create_group("o1", "vip").unwrap();
        db.add_group_member(&g.id, &x.id).unwrap();
        db.add_group_member(&g.id, &y.id).unwrap();

        db.remove_group_member(&g.id, &x.id).unwrap();
        let addresses = db
            .group_member_addresses("o1", Platform::WhatsApp, &[g.id.clone()])
            .unwrap();
        assert_eq!(addresses, vec!["222"]);
        // the contact itself survives, only the membership is gone
        assert_eq!(
            db.active_contact_addresses("o1", Platform::WhatsApp).unwrap(),
            vec!["111", "222"]
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_explicit_ids_skip_unknown() {
        let (db, dir) = temp_db("explicit");
        let x = Contact::new("o1", Platform::Telegram, "111", "X");
        db.upsert_contact(&x).unwrap();
        let addresses = db
            .addresses_for_contacts("o1", Platform::Telegram, &[x.id.clone(), "ct-missing".into()])
            .unwrap();
        assert_eq!(addresses, vec!["111"]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
