//! # Blastline Channels
//!
//! The Channel Adapter boundary: one implementation per messaging platform,
//! all behind the [`ChannelAdapter`] trait. Adapters place the outbound HTTP
//! call and classify failures as transient (retryable) or permanent; inbound
//! webhook payloads are parsed into [`Receipt`] events for the tracker.

pub mod meta;
pub mod receipt;
pub mod telegram;
pub mod whatsapp;

use async_trait::async_trait;
use blastline_core::config::ChannelConfig;
use blastline_core::types::{MessageSpec, Platform};

pub use receipt::Receipt;

/// Outcome classification for a single send attempt.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Timeout, rate limit, or upstream 5xx — worth retrying.
    #[error("Transient send error: {0}")]
    Transient(String),
    /// Invalid recipient, blocked account, malformed payload — never retried.
    #[error("Permanent send error: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }

    /// Classify an HTTP response status. 429 and 5xx are retryable; any
    /// other non-success status is a caller problem.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            SendError::Transient(format!("HTTP {status}: {body}"))
        } else {
            SendError::Permanent(format!("HTTP {status}: {body}"))
        }
    }

    /// Classify a reqwest transport error. Connection and timeout failures
    /// are transient; anything else (bad request construction) is not.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            SendError::Transient(err.to_string())
        } else {
            SendError::Permanent(err.to_string())
        }
    }
}

pub type SendResult<T> = std::result::Result<T, SendError>;

/// Per-platform send boundary.
///
/// `send` returns the provider-assigned message id used later to correlate
/// delivery/read receipts.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn send(&self, recipient: &str, message: &MessageSpec) -> SendResult<String>;
}

/// Build the adapter for a platform from channel config.
pub fn build_adapter(
    platform: Platform,
    config: &ChannelConfig,
) -> blastline_core::Result<std::sync::Arc<dyn ChannelAdapter>> {
    use blastline_core::BlastlineError;
    match platform {
        Platform::WhatsApp => {
            let cfg = config.whatsapp.clone().ok_or_else(|| {
                BlastlineError::Config("WhatsApp channel not configured".into())
            })?;
            Ok(std::sync::Arc::new(whatsapp::WhatsAppAdapter::new(cfg)))
        }
        Platform::Telegram => {
            let cfg = config.telegram.clone().ok_or_else(|| {
                BlastlineError::Config("Telegram channel not configured".into())
            })?;
            Ok(std::sync::Arc::new(telegram::TelegramAdapter::new(cfg)))
        }
        Platform::Facebook | Platform::Instagram => {
            let cfg = config
                .meta
                .clone()
                .ok_or_else(|| BlastlineError::Config("Meta channel not configured".into()))?;
            Ok(std::sync::Arc::new(meta::MetaAdapter::new(platform, cfg)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let e = SendError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(e.is_transient());
        let e = SendError::from_status(reqwest::StatusCode::BAD_GATEWAY, "".into());
        assert!(e.is_transient());
        let e = SendError::from_status(reqwest::StatusCode::BAD_REQUEST, "bad recipient".into());
        assert!(!e.is_transient());
        let e = SendError::from_status(reqwest::StatusCode::FORBIDDEN, "blocked".into());
        assert!(!e.is_transient());
    }
}
