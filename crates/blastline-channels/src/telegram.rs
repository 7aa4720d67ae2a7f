//! Telegram Bot API adapter.
//!
//! Sends via `sendMessage`/`sendPhoto`/`sendDocument`. Telegram has no
//! per-message delivery webhook for bots, so receipts for this platform
//! arrive through the normalized webhook route when a relay provides them.

use async_trait::async_trait;
use blastline_core::config::TelegramConfig;
use blastline_core::types::{MessageSpec, Platform};

use crate::{ChannelAdapter, SendError, SendResult};

pub struct TelegramAdapter {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramAdapter {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }

    /// Pick the Bot API method and body for a message spec.
    fn request_for(&self, chat_id: &str, message: &MessageSpec) -> SendResult<(String, serde_json::Value)> {
        match message {
            MessageSpec::Text { body } => Ok((
                self.api_url("sendMessage"),
                serde_json::json!({"chat_id": chat_id, "text": body}),
            )),
            MessageSpec::Media {
                media_type,
                url,
                caption,
            } => {
                let (method, field) = match media_type.as_str() {
                    "image" => ("sendPhoto", "photo"),
                    "video" => ("sendVideo", "video"),
                    _ => ("sendDocument", "document"),
                };
                let mut body = serde_json::json!({"chat_id": chat_id, field: url});
                if let Some(caption) = caption {
                    body["caption"] = caption.as_str().into();
                }
                Ok((self.api_url(method), body))
            }
            MessageSpec::Template { .. } => Err(SendError::Permanent(
                "Template messages are not supported on Telegram".into(),
            )),
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn platform(&self) -> Platform {
        Platform::Telegram
    }

    async fn send(&self, recipient: &str, message: &MessageSpec) -> SendResult<String> {
        let (url, body) = self.request_for(recipient, message)?;

        let response = self
            .client
            .post(&url)
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
            .map_err(|e| SendError::Transient(format!("Invalid Telegram response: {e}")))?;

        if result["ok"].as_bool() != Some(true) {
            return Err(SendError::Permanent(format!(
                "Telegram API rejected the message: {}",
                result["description"].as_str().unwrap_or("unknown")
            )));
        }

        let msg_id = result["result"]["message_id"].as_i64().ok_or_else(|| {
            SendError::Permanent("Telegram response carried no message_id".into())
        })?;

        tracing::debug!("Telegram message sent: {} -> {}", msg_id, recipient);
        // Prefix with the chat id: Bot API message ids are only unique per chat.
        Ok(format!("tg-{recipient}-{msg_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> TelegramAdapter {
        TelegramAdapter::new(TelegramConfig {
            bot_token: "123:abc".into(),
        })
    }

    #[test]
    fn test_text_request() {
        let (url, body) = adapter()
            .request_for(
                "5551",
                &MessageSpec::Text {
                    body: "hi there".into(),
                },
            )
            .unwrap();
        assert!(url.ends_with("/sendMessage"));
        assert_eq!(body["chat_id"], "5551");
        assert_eq!(body["text"], "hi there");
    }

    #[test]
    fn test_image_uses_send_photo() {
        let (url, body) = adapter()
            .request_for(
                "5551",
                &MessageSpec::Media {
                    media_type: "image".into(),
                    url: "https://cdn.example.com/a.png".into(),
                    caption: Some("look".into()),
                },
            )
            .unwrap();
        assert!(url.ends_with("/sendPhoto"));
        assert_eq!(body["photo"], "https://cdn.example.com/a.png");
        assert_eq!(body["caption"], "look");
    }

    #[test]
    fn test_template_is_permanent_error() {
        let err = adapter()
            .request_for(
                "5551",
                &MessageSpec::Template {
                    template_name: "promo".into(),
                    variables: vec![],
                },
            )
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
