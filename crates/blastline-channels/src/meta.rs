//! Meta Graph adapter — Facebook Messenger and Instagram Direct.
//!
//! Both platforms use the Send API on the Graph endpoint with a page access
//! token; Instagram rides the page's bound business account. Delivery
//! receipts arrive on the page webhook as `messaging[].delivery.mids`.

use async_trait::async_trait;
use blastline_core::config::MetaConfig;
use blastline_core::types::{MessageSpec, Platform, ReceiptEvent};

use crate::receipt::Receipt;
use crate::{ChannelAdapter, SendError, SendResult};

const GRAPH_BASE: &str = "https://graph.facebook.com/v21.0";

pub struct MetaAdapter {
    platform: Platform,
    config: MetaConfig,
    client: reqwest::Client,
}

impl MetaAdapter {
    /// `platform` must be `Facebook` or `Instagram`.
    pub fn new(platform: Platform, config: MetaConfig) -> Self {
        debug_assert!(matches!(
            platform,
            Platform::Facebook | Platform::Instagram
        ));
        Self {
            platform,
            config,
            client: reqwest::Client::new(),
        }
    }

    fn message_body(&self, recipient: &str, message: &MessageSpec) -> SendResult<serde_json::Value> {
        let inner = match message {
            MessageSpec::Text { body } => serde_json::json!({"text": body}),
            MessageSpec::Media {
                media_type, url, ..
            } => serde_json::json!({
                "attachment": {
                    "type": media_type,
                    "payload": {"url": url, "is_reusable": true}
                }
            }),
            MessageSpec::Template { .. } => {
                return Err(SendError::Permanent(format!(
                    "Template messages are not supported on {}",
                    self.platform
                )));
            }
        };
        Ok(serde_json::json!({
            "recipient": {"id": recipient},
            "messaging_type": "MESSAGE_TAG",
            "tag": "CONFIRMED_EVENT_UPDATE",
            "message": inner,
        }))
    }

    /// Parse a page webhook into receipts: `entry[].messaging[].delivery.mids`
    /// marks each listed message id delivered. Reads only carry a watermark
    /// (no message id), so they cannot be correlated and are skipped.
    pub fn parse_delivery_webhook(payload: &serde_json::Value) -> Vec<Receipt> {
        let mut receipts = Vec::new();
        let Some(entries) = payload["entry"].as_array() else {
            return receipts;
        };
        for entry in entries {
            let Some(messaging) = entry["messaging"].as_array() else {
                continue;
            };
            for event in messaging {
                if let Some(mids) = event["delivery"]["mids"].as_array() {
                    let watermark = event["delivery"]["watermark"]
                        .as_i64()
                        .map(|ms| ms / 1000);
                    for mid in mids.iter().filter_map(|m| m.as_str()) {
                        receipts.push(Receipt::at(mid, ReceiptEvent::Delivered, watermark));
                    }
                }
            }
        }
        receipts
    }
}

#[async_trait]
impl ChannelAdapter for MetaAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn send(&self, recipient: &str, message: &MessageSpec) -> SendResult<String> {
        let body = self.message_body(recipient, message)?;

        let response = self
            .client
            .post(format!("{GRAPH_BASE}/me/messages"))
            .query(&[("access_token", &self.config.page_access_token)])
            .json(&body)
            .send()
            .await
            .map_err(SendError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SendError::from_status(status, text));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SendError::Transient(format!("Invalid Graph response: {e}")))?;

        let msg_id = result["message_id"]
            .as_str()
            .ok_or_else(|| SendError::Permanent("Graph response carried no message_id".into()))?;

        tracing::debug!(
            "{} message sent: {} -> {}",
            self.platform,
            msg_id,
            recipient
        );
        Ok(msg_id.to_string())
    }
}
