use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

/// The messaging collaborator. One implementation per hosting process;
/// concrete platform adapters (whatsapp, telegram, email, webhook) live
/// behind it.
#[async_trait]
pub trait Messaging: Send + Sync {
    async fn send(
        &self,
        platform: &str,
        recipient: &str,
        content: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, NodeError>;

    /// Nudge a responder whose reply failed validation. Used by the wait
    /// coordinator between retry attempts.
    async fn send_retry_prompt(&self, wait_id: &str, text: &str) -> Result<(), NodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Text,
    Markdown,
    Html,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub format: MessageFormat,
    pub reply_to: Option<String>,
    pub attachments: Vec<String>,
    /// Platform-specific fields: buttons, keyboards, subject/cc/bcc,
    /// media URLs. Passed through untouched.
    pub extra: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub platform: String,
    pub status: String,
}

/// An inbound message offered to the wait coordinator by the hosting
/// process's `subscribe-inbound` handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: String,
    pub message_id: String,
    pub sender: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Button/callback payload, when the platform supports it.
    #[serde(default)]
    pub callback_data: Option<String>,
}
