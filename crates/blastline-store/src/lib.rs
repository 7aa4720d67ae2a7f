//! # Blastline Store
//!
//! Durable record of campaigns, their frozen recipient-task snapshots, and
//! aggregate counters, backed by SQLite. Every status change and every
//! counter update goes through a conditional `UPDATE ... WHERE status = ?`
//! inside one transaction, so concurrent sweeps and dispatch workers can
//! race safely: exactly one caller wins each transition.

mod contacts;
mod db;

pub use contacts::{Contact, ContactGroup};
pub use db::{CampaignDb, ReceiptApply};
