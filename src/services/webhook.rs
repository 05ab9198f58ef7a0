use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::messaging::{Messaging, SendOptions, SendReceipt};
use crate::error::NodeError;

/// Webhook messaging adapter: the recipient is a URL and delivery is a
/// JSON POST. The one platform shipped in-tree; everything else stays
/// behind the `Messaging` trait in the hosting process.
pub struct WebhookMessenger {
    http_client: Arc<reqwest::Client>,
}

impl WebhookMessenger {
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Messaging for WebhookMessenger {
    async fn send(
        &self,
        platform: &str,
        recipient: &str,
        content: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, NodeError> {
        if platform != "webhook" {
            return Err(NodeError::resource(format!(
                "platform '{platform}' not available (webhook adapter only)"
            )));
        }

        let mut body = json!({
            "message": content,
            "format": options.format,
        });
        if let Some(reply_to) = &options.reply_to {
            body["reply_to"] = json!(reply_to);
        }
        if let Value::Object(extra) = &options.extra {
            for (k, v) in extra {
                body[k.as_str()] = v.clone();
            }
        }

        let response = self
            .http_client
            .post(recipient)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NodeError::timeout(format!("webhook POST to {recipient} timed out"))
                } else {
                    NodeError::external(format!("webhook POST to {recipient} failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::external(format!(
                "webhook {recipient} returned {status}"
            )));
        }

        Ok(SendReceipt {
            message_id: uuid::Uuid::new_v4().to_string(),
            platform: "webhook".to_string(),
            status: "sent".to_string(),
        })
    }

    async fn send_retry_prompt(&self, _wait_id: &str, _text: &str) -> Result<(), NodeError> {
        // Webhooks are one-way; there is no responder to nudge.
        Ok(())
    }
}
