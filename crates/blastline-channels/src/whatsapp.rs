//! WhatsApp Business Cloud API adapter.
//!
//! Uses the official WhatsApp Business Platform (Cloud API). Requires an
//! Access Token + Phone Number ID from Meta Business Suite; the phone number
//! id is the sending identity the dispatcher rate-budgets against.

use async_trait::async_trait;
use blastline_core::config::WhatsAppConfig;
use blastline_core::types::{MessageSpec, Platform, ReceiptEvent};

use crate::receipt::Receipt;
use crate::{ChannelAdapter, SendError, SendResult};

const GRAPH_BASE: &str = "https://graph.facebook.com/v21.0";

pub struct WhatsAppAdapter {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppAdapter {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build the Cloud API message body for a spec.
    fn message_body(&self, to: &str, message: &MessageSpec) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
        });
        match message {
            MessageSpec::Text { body: text } => {
                body["type"] = "text".into();
                body["text"] = serde_json::json!({"preview_url": false, "body": text});
            }
            MessageSpec::Media {
                media_type,
                url,
                caption,
            } => {
                // Cloud API accepts image/video/document/audio objects by link
                body["type"] = media_type.as_str().into();
                let mut media = serde_json::json!({"link": url});
                if let Some(caption) = caption {
                    media["caption"] = caption.as_str().into();
                }
                body[media_type.as_str()] = media;
            }
            MessageSpec::Template {
                template_name,
                variables,
            } => {
                body["type"] = "template".into();
                let params: Vec<serde_json::Value> = variables
                    .iter()
                    .map(|v| serde_json::json!({"type": "text", "text": v}))
                    .collect();
                body["template"] = serde_json::json!({
                    "name": template_name,
                    "language": {"code": "en"},
                    "components": [{"type": "body", "parameters": params}],
                });
            }
        }
        body
    }

    /// Parse a Cloud API status webhook into receipt events.
    ///
    /// Shape: `entry[].changes[].value.statuses[]` with `id` (the provider
    /// message id) and `status` in `sent|delivered|read|failed`.
    pub fn parse_status_webhook(payload: &serde_json::Value) -> Vec<Receipt> {
        let mut receipts = Vec::new();
        let Some(entries) = payload["entry"].as_array() else {
            return receipts;
        };
        for entry in entries {
            let Some(changes) = entry["changes"].as_array() else {
                continue;
            };
            for change in changes {
                let Some(statuses) = change["value"]["statuses"].as_array() else {
                    continue;
                };
                for status in statuses {
                    let Some(id) = status["id"].as_str() else {
                        continue;
                    };
                    let event = match status["status"].as_str() {
                        Some("delivered") => ReceiptEvent::Delivered,
                        Some("read") => ReceiptEvent::Read,
                        Some("failed") => ReceiptEvent::Failed,
                        // "sent" acks and unknown statuses carry no new state
                        _ => continue,
                    };
                    receipts.push(Receipt::at(
                        id,
                        event,
                        status["timestamp"]
                            .as_str()
                            .and_then(|t| t.parse::<i64>().ok()),
                    ));
                }
            }
        }
        receipts
    }
}

#[async_trait]
impl ChannelAdapter for WhatsAppAdapter {
    fn platform(&self) -> Platform {
        Platform::WhatsApp
    }

    async fn send(&self, recipient: &str, message: &MessageSpec) -> SendResult<String> {
        let url = format!("{GRAPH_BASE}/{}/messages", self.config.phone_number_id);
        let body = self.message_body(recipient, message);

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.access_token),
            )
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
            .map_err(|e| SendError::Transient(format!("Invalid WhatsApp response: {e}")))?;

        let msg_id = result["messages"][0]["id"].as_str().ok_or_else(|| {
            SendError::Permanent("WhatsApp response carried no message id".into())
        })?;

        tracing::debug!("WhatsApp message sent: {} -> {}", msg_id, recipient);
        Ok(msg_id.to_string())
    }
}
