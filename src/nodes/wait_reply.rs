use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::flows::Node;
use crate::flows::wait::{MatchPredicate, WaitOutcome, WaitSpec};

/// Suspends the traversal until a matching inbound message arrives, then
/// routes down `reply`, `timeout` or `invalid`.
pub struct WaitForReplyExecutor;

#[async_trait]
impl NodeExecutor for WaitForReplyExecutor {
    fn type_name(&self) -> &'static str {
        "waitForReply"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut problems = Vec::new();
        if let Err(error) = MatchPredicate::from_config(&node.config) {
            problems.push(error);
        }
        if node.config.get("timeoutMs").is_some() && node.config["timeoutMs"].as_u64().is_none() {
            problems.push("'timeoutMs' must be a non-negative integer".to_string());
        }
        problems
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let predicate = match MatchPredicate::from_config(&ctx.data) {
            Ok(predicate) => predicate,
            Err(problem) => {
                return NodeResult::fail(crate::error::NodeError::validation(problem));
            }
        };

        let channel = ctx.data["channel"]
            .as_str()
            .filter(|c| *c != "any")
            .map(String::from);
        let spec = WaitSpec {
            execution_id: ctx.exec.execution_id.clone(),
            node_id: ctx.node.id.clone(),
            channel,
            sender: ctx.data["sender"].as_str().map(String::from),
            conversation: ctx.data["conversation"].as_str().map(String::from),
            predicate,
            retry_on_invalid: ctx.data["retryOnInvalid"].as_bool().unwrap_or(false),
            retry_limit: ctx.data["maxRetries"].as_u64().unwrap_or(3) as u32,
            retry_prompt: ctx.data["retryPrompt"].as_str().map(String::from),
        };
        let timeout = ctx.data["timeoutMs"].as_u64().map(Duration::from_millis);

        let handle = ctx.wait.register(spec).await;
        let wait_id = handle.wait_id.clone();
        tracing::debug!(
            node = %ctx.node.display(),
            wait_id = %wait_id,
            timeout_ms = timeout.map(|t| t.as_millis() as u64),
            "Suspended waiting for reply"
        );

        match ctx.wait.await_outcome(handle, ctx.exec, timeout).await {
            Ok(WaitOutcome::Reply(message)) => NodeResult::ok(json!({
                "reply": message,
                "waitId": wait_id,
            }))
            .with_branches(vec!["reply".to_string()]),
            Ok(WaitOutcome::Timeout) => NodeResult::ok(json!({
                "timeout": true,
                "waitId": wait_id,
            }))
            .with_branches(vec!["timeout".to_string()]),
            Ok(WaitOutcome::Invalid {
                last_message,
                retries_used,
            }) => NodeResult::ok(json!({
                "invalid": true,
                "retriesUsed": retries_used,
                "lastMessage": last_message,
                "waitId": wait_id,
            }))
            .with_branches(vec!["invalid".to_string()]),
            Err(error) => NodeResult::fail(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Position;
    use serde_json::{Value, json};

    fn node(config: Value) -> Node {
        Node {
            id: "w1".to_string(),
            node_type: "waitForReply".to_string(),
            subtype: None,
            config,
            label: String::new(),
            position: Position::default(),
        }
    }

    #[test]
    fn validate_checks_predicate_and_timeout() {
        let executor = WaitForReplyExecutor;
        assert!(executor.validate(&node(json!({}))).is_empty());
        assert!(
            executor
                .validate(&node(json!({"matchType": "exact", "matchValue": "y"})))
                .is_empty()
        );
        assert!(!executor.validate(&node(json!({"matchType": "exact"}))).is_empty());
        assert!(
            !executor
                .validate(&node(json!({"timeoutMs": "soon"})))
                .is_empty()
        );
    }
}
