use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeError;

/// The AI model router collaborator. Implementations route to whatever
/// provider stack the hosting process wires in; the engine only sees this
/// contract.
///
/// Errors distinguish `resource` (no provider available), `external`
/// (provider error) and `timeout`.
#[async_trait]
pub trait AiService: Send + Sync {
    async fn query(
        &self,
        agent_id: &str,
        messages: &[AiMessage],
        options: &AiOptions,
    ) -> Result<AiResponse, NodeError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiMessage {
    pub role: String,
    pub content: String,
}

impl AiMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AiOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub content: String,
    pub model: String,
    pub usage: AiUsage,
    #[serde(default)]
    pub metadata: Value,
}
