//! Receipt events — the inbound half of the channel boundary.

use blastline_core::types::ReceiptEvent;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One delivery/read/failed notification for a previously-sent message,
/// correlated by the provider-assigned message id. Providers may redeliver
/// webhooks, so consumers must treat receipts as at-least-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub provider_message_id: String,
    pub event: ReceiptEvent,
    pub timestamp: DateTime<Utc>,
}

impl Receipt {
    pub fn new(provider_message_id: &str, event: ReceiptEvent) -> Self {
        Self {
            provider_message_id: provider_message_id.to_string(),
            event,
            timestamp: Utc::now(),
        }
    }

    /// Build a receipt stamped from a provider unix-seconds timestamp,
    /// falling back to now when the payload omits it.
    pub fn at(provider_message_id: &str, event: ReceiptEvent, unix_secs: Option<i64>) -> Self {
        let timestamp = unix_secs
            .and_then(|s| Utc.timestamp_opt(s, 0).single())
            .unwrap_or_else(Utc::now);
        Self {
            provider_message_id: provider_message_id.to_string(),
            event,
            timestamp,
        }
    }
}

/// Parse the normalized receipt body accepted on the generic webhook route:
/// `{"provider_message_id": "...", "event": "delivered|read|failed",
/// "timestamp": "..."}` — used by platforms without a structured parser and
/// by upstream relays that pre-normalize.
pub fn parse_normalized(payload: &serde_json::Value) -> Option<Receipt> {
    let id = payload["provider_message_id"].as_str()?;
    let event = match payload["event"].as_str()? {
        "delivered" => ReceiptEvent::Delivered,
        "read" => ReceiptEvent::Read,
        "failed" => ReceiptEvent::Failed,
        _ => return None,
    };
    let timestamp = payload["timestamp"]
        .as_str()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    Some(Receipt {
        provider_message_id: id.to_string(),
        event,
        timestamp,
    })
}
