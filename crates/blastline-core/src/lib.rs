//! # Blastline Core
//!
//! Shared foundation for the campaign engine: the campaign/task data model,
//! the status state machines, the error taxonomy, and configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::BlastlineConfig;
pub use error::{BlastlineError, Result};
pub use types::{
    Campaign, CampaignStatus, MessageSpec, Platform, ReceiptEvent, RecipientPolicy, RecipientTask,
    ScheduleType, TaskState,
};
