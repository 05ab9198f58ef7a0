use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::ai::{AiMessage, AiOptions, AiResponse, AiService, AiUsage};
use super::messaging::{Messaging, SendOptions, SendReceipt};
use crate::error::NodeError;

/// Scriptable AI collaborator for tests and `dagon run` without a
/// provider. Scripted results are consumed in order; when the script is
/// empty, the last user message is echoed back.
#[derive(Default)]
pub struct StubAi {
    script: Mutex<VecDeque<Result<AiResponse, NodeError>>>,
    calls: Mutex<Vec<(String, Vec<AiMessage>)>>,
}

impl StubAi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_ok(&self, content: impl Into<String>) {
        self.script.lock().unwrap().push_back(Ok(AiResponse {
            content: content.into(),
            model: "stub-1".to_string(),
            usage: AiUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            metadata: serde_json::Value::Null,
        }));
    }

    pub fn enqueue_err(&self, error: NodeError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AiService for StubAi {
    async fn query(
        &self,
        agent_id: &str,
        messages: &[AiMessage],
        _options: &AiOptions,
    ) -> Result<AiResponse, NodeError> {
        self.calls
            .lock()
            .unwrap()
            .push((agent_id.to_string(), messages.to_vec()));

        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted;
        }

        let echo = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(AiResponse {
            content: echo,
            model: "stub-1".to_string(),
            usage: AiUsage::default(),
            metadata: serde_json::Value::Null,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub platform: String,
    pub recipient: String,
    pub content: String,
    pub extra: serde_json::Value,
}

/// Recording messaging collaborator. `fail_next` scripts failures for the
/// following sends; everything else succeeds with a sequential id.
#[derive(Default)]
pub struct StubMessaging {
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<VecDeque<NodeError>>,
    retry_prompts: Mutex<Vec<(String, String)>>,
}

impl StubMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: NodeError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn retry_prompts(&self) -> Vec<(String, String)> {
        self.retry_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messaging for StubMessaging {
    async fn send(
        &self,
        platform: &str,
        recipient: &str,
        content: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, NodeError> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push(SentMessage {
            platform: platform.to_string(),
            recipient: recipient.to_string(),
            content: content.to_string(),
            extra: options.extra.clone(),
        });
        Ok(SendReceipt {
            message_id: format!("msg-{}", sent.len()),
            platform: platform.to_string(),
            status: "sent".to_string(),
        })
    }

    async fn send_retry_prompt(&self, wait_id: &str, text: &str) -> Result<(), NodeError> {
        self.retry_prompts
            .lock()
            .unwrap()
            .push((wait_id.to_string(), text.to_string()));
        Ok(())
    }
}
