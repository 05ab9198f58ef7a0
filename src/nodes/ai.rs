use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::flows::Node;
use crate::services::ai::{AiMessage, AiOptions};

/// Queries the AI collaborator with a prompt (or message list) from
/// resolved config.
pub struct AiExecutor;

#[async_trait]
impl NodeExecutor for AiExecutor {
    fn type_name(&self) -> &'static str {
        "ai"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let has_prompt = node.config["prompt"].as_str().is_some();
        let has_messages = node.config["messages"].is_array();
        if has_prompt || has_messages {
            Vec::new()
        } else {
            vec!["ai node requires 'prompt' or 'messages'".to_string()]
        }
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let agent_id = ctx.data["agentId"].as_str().unwrap_or("default");

        let mut messages = Vec::new();
        if let Some(system) = ctx.data["system"].as_str() {
            messages.push(AiMessage::system(system));
        }
        if let Some(list) = ctx.data["messages"].as_array() {
            for entry in list {
                messages.push(AiMessage {
                    role: entry["role"].as_str().unwrap_or("user").to_string(),
                    content: entry["content"].as_str().unwrap_or_default().to_string(),
                });
            }
        }
        if let Some(prompt) = ctx.data["prompt"].as_str() {
            messages.push(AiMessage::user(prompt));
        }

        let options = AiOptions {
            temperature: ctx.data["temperature"].as_f64().map(|t| t as f32),
            max_tokens: ctx.data["maxTokens"].as_u64().map(|t| t as u32),
            timeout: ctx.data["timeoutMs"].as_u64().map(Duration::from_millis),
        };

        match ctx.services.ai.query(agent_id, &messages, &options).await {
            Ok(response) => NodeResult::ok(json!({
                "content": response.content,
                "model": response.model,
                "usage": response.usage,
                "metadata": response.metadata,
            })),
            Err(error) => NodeResult::fail(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Position;
    use serde_json::Value;

    fn node(config: Value) -> Node {
        Node {
            id: "a1".to_string(),
            node_type: "ai".to_string(),
            subtype: None,
            config,
            label: String::new(),
            position: Position::default(),
        }
    }

    #[test]
    fn validate_requires_prompt_or_messages() {
        let executor = AiExecutor;
        assert!(!executor.validate(&node(json!({}))).is_empty());
        assert!(executor.validate(&node(json!({"prompt": "hi"}))).is_empty());
        assert!(
            executor
                .validate(&node(json!({"messages": [{"role": "user", "content": "hi"}]})))
                .is_empty()
        );
    }
}
