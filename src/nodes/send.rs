use async_trait::async_trait;
use serde_json::Value;

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::error::NodeError;
use crate::flows::Node;
use crate::flows::dispatch::{DispatchBridge, DispatchTarget};
use crate::services::messaging::{MessageFormat, SendOptions};

/// Outbound message node. Delivery goes through the cross-agent dispatch
/// bridge so one node can answer the triggering sender, hit an explicit
/// recipient list, or broadcast.
pub struct SendExecutor;

fn platform_of(node: &Node, data: &Value) -> Option<String> {
    if let Some(platform) = data["platform"].as_str().or(data["channel"].as_str()) {
        return Some(platform.to_string());
    }
    match node.subtype.as_deref() {
        Some("sendWhatsApp") => Some("whatsapp".to_string()),
        Some("sendTelegram") => Some("telegram".to_string()),
        Some("sendEmail") => Some("email".to_string()),
        Some("sendWebhook") => Some("webhook".to_string()),
        _ => None,
    }
}

fn content_of(data: &Value) -> Option<String> {
    data["content"]
        .as_str()
        .or(data["message"].as_str())
        .map(String::from)
}

fn options_of(data: &Value) -> SendOptions {
    let format = match data["format"].as_str() {
        Some("markdown") => MessageFormat::Markdown,
        Some("html") => MessageFormat::Html,
        _ => MessageFormat::Text,
    };
    SendOptions {
        format,
        reply_to: data["replyTo"].as_str().map(String::from),
        attachments: data["attachments"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default(),
        extra: data.get("options").cloned().unwrap_or(Value::Null),
    }
}

fn target_of(data: &Value) -> Result<DispatchTarget, NodeError> {
    // A bare `recipient` is shorthand for a one-entry specific target.
    if data["target"].is_null() {
        if let Some(recipient) = data["recipient"].as_str() {
            return Ok(DispatchTarget::Specific {
                recipients: vec![recipient.to_string()],
            });
        }
    }
    DispatchTarget::from_config(data)
}

#[async_trait]
impl NodeExecutor for SendExecutor {
    fn type_name(&self) -> &'static str {
        "messaging"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut problems = Vec::new();
        if platform_of(node, &node.config).is_none() {
            problems.push("send node requires 'platform' (or a platform subtype)".to_string());
        }
        if content_of(&node.config).is_none() {
            problems.push("send node requires 'content'".to_string());
        }
        if let Err(error) = target_of(&node.config) {
            problems.push(error.message);
        }
        problems
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let Some(platform) = platform_of(ctx.node, &ctx.data) else {
            return NodeResult::fail(NodeError::validation("send node requires 'platform'"));
        };
        let Some(content) = content_of(&ctx.data) else {
            return NodeResult::fail(NodeError::validation("send node requires 'content'"));
        };
        let target = match target_of(&ctx.data) {
            Ok(target) => target,
            Err(error) => return NodeResult::fail(error),
        };
        let options = options_of(&ctx.data);

        let bridge = DispatchBridge::new(ctx.services.messaging.clone());
        match bridge
            .dispatch(ctx.exec, &target, &platform, &content, &options)
            .await
        {
            Ok(report) => NodeResult::ok(report.to_json()),
            Err(error) => NodeResult::fail(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Position;
    use serde_json::json;

    fn node(subtype: Option<&str>, config: Value) -> Node {
        Node {
            id: "s1".to_string(),
            node_type: "messaging".to_string(),
            subtype: subtype.map(String::from),
            config,
            label: String::new(),
            position: Position::default(),
        }
    }

    #[test]
    fn platform_comes_from_config_or_subtype() {
        let n = node(None, json!({"platform": "telegram"}));
        assert_eq!(platform_of(&n, &n.config).as_deref(), Some("telegram"));

        let n = node(Some("sendWhatsApp"), json!({}));
        assert_eq!(platform_of(&n, &n.config).as_deref(), Some("whatsapp"));

        let n = node(None, json!({"channel": "webhook"}));
        assert_eq!(platform_of(&n, &n.config).as_deref(), Some("webhook"));

        let n = node(Some("sendText"), json!({}));
        assert!(platform_of(&n, &n.config).is_none());
    }

    #[test]
    fn bare_recipient_becomes_specific_target() {
        let target = target_of(&json!({"recipient": "u1"})).unwrap();
        assert_eq!(
            target,
            DispatchTarget::Specific {
                recipients: vec!["u1".to_string()]
            }
        );
    }

    #[test]
    fn validate_reports_all_problems() {
        let executor = SendExecutor;
        let problems = executor.validate(&node(None, json!({})));
        assert_eq!(problems.len(), 2);

        let valid = node(
            Some("sendTelegram"),
            json!({"content": "hi", "recipient": "123"}),
        );
        assert!(executor.validate(&valid).is_empty());
    }
}
