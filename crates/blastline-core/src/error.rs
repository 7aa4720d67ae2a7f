//! Error taxonomy for the campaign engine.
//!
//! Per-task send failures are absorbed by the dispatcher and never abort a
//! campaign; the variants here are the structural errors that reach a caller.

use crate::types::CampaignStatus;

/// Convenience result alias used across the workspace.
pub type Result<T> = std::result::Result<T, BlastlineError>;

/// Campaign-level errors surfaced to callers and operators.
#[derive(Debug, thiserror::Error)]
pub enum BlastlineError {
    /// Malformed campaign definition — rejected at submission, never persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A recipient policy resolved to an empty set.
    #[error("Recipient resolution error: {0}")]
    RecipientResolution(String),

    /// A status change the campaign state machine does not allow.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Campaign not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BlastlineError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::RecipientResolution(_) => "recipient_resolution_error",
            Self::InvalidTransition { .. } => "invalid_state_transition",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store_error",
            Self::Config(_) => "config_error",
            Self::Channel(_) => "channel_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }
}
