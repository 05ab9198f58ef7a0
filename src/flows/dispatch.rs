use std::sync::Arc;

use serde_json::{Value, json};

use super::context::ExecutionContext;
use crate::error::NodeError;
use crate::services::messaging::{Messaging, SendOptions};

/// Who an outbound message goes to.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchTarget {
    /// The sender that triggered this run.
    Reply,
    /// A selected agent and explicit recipient list.
    Specific { recipients: Vec<String> },
    /// Recipient list resolved from the scope at dispatch time.
    Variable { path: String },
    /// One sender, many recipients.
    Broadcast { recipients: Vec<String> },
}

impl DispatchTarget {
    /// Parse from node config's `target` block. Defaults to `reply` so a
    /// bare send node answers whoever triggered the flow.
    pub fn from_config(config: &Value) -> Result<Self, NodeError> {
        let target = &config["target"];
        let mode = target["mode"].as_str().unwrap_or("reply");
        match mode {
            "reply" => Ok(DispatchTarget::Reply),
            "specific" => Ok(DispatchTarget::Specific {
                recipients: string_list(&target["recipients"]),
            }),
            "variable" => target["path"]
                .as_str()
                .map(|p| DispatchTarget::Variable {
                    path: p.to_string(),
                })
                .ok_or_else(|| {
                    NodeError::validation("target mode 'variable' requires 'path'")
                }),
            "broadcast" => Ok(DispatchTarget::Broadcast {
                recipients: string_list(&target["recipients"]),
            }),
            other => Err(NodeError::validation(format!(
                "unknown target mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecipientResult {
    pub recipient: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub results: Vec<RecipientResult>,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn to_json(&self) -> Value {
        json!({
            "total": self.total,
            "sent": self.sent,
            "failed": self.failed,
            "results": self.results.iter().map(|r| json!({
                "recipient": r.recipient,
                "success": r.success,
                "messageId": r.message_id,
                "error": r.error,
            })).collect::<Vec<_>>(),
        })
    }
}

/// Routes one outbound message to one or many recipients through the
/// messaging collaborator, aggregating per-recipient results.
pub struct DispatchBridge {
    messaging: Arc<dyn Messaging>,
}

impl DispatchBridge {
    pub fn new(messaging: Arc<dyn Messaging>) -> Self {
        Self { messaging }
    }

    /// Deliver `content` per the target spec. A wholly-failed dispatch
    /// (sent=0, failed>0) is an `external` error; partial failure is a
    /// success whose report carries the per-recipient details.
    pub async fn dispatch(
        &self,
        exec: &ExecutionContext,
        target: &DispatchTarget,
        platform: &str,
        content: &str,
        options: &SendOptions,
    ) -> Result<DispatchReport, NodeError> {
        let recipients = self.resolve_recipients(exec, target)?;
        if recipients.is_empty() {
            return Err(NodeError::validation("dispatch resolved zero recipients"));
        }

        let mut results = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            exec.checkpoint()?;
            match self
                .messaging
                .send(platform, recipient, content, options)
                .await
            {
                Ok(receipt) => results.push(RecipientResult {
                    recipient: recipient.clone(),
                    success: true,
                    message_id: Some(receipt.message_id),
                    error: None,
                }),
                Err(error) => {
                    tracing::warn!(
                        recipient = %recipient,
                        platform = %platform,
                        error = %error,
                        "Dispatch to recipient failed"
                    );
                    results.push(RecipientResult {
                        recipient: recipient.clone(),
                        success: false,
                        message_id: None,
                        error: Some(error.message),
                    });
                }
            }
        }

        let sent = results.iter().filter(|r| r.success).count();
        let failed = results.len() - sent;
        let report = DispatchReport {
            total: results.len(),
            sent,
            failed,
            results,
        };

        if report.sent == 0 {
            return Err(NodeError::external(format!(
                "dispatch failed for all {} recipient(s)",
                report.total
            )));
        }
        Ok(report)
    }

    fn resolve_recipients(
        &self,
        exec: &ExecutionContext,
        target: &DispatchTarget,
    ) -> Result<Vec<String>, NodeError> {
        match target {
            DispatchTarget::Reply => exec
                .with_scope(|scope| scope.trigger.source.clone())
                .map(|sender| vec![sender])
                .ok_or_else(|| {
                    NodeError::validation("reply target but the trigger has no sender")
                }),
            DispatchTarget::Specific { recipients }
            | DispatchTarget::Broadcast { recipients } => Ok(recipients.clone()),
            DispatchTarget::Variable { path } => {
                let value = exec.lookup(path).unwrap_or(Value::Null);
                let recipients = match &value {
                    Value::String(s) if !s.is_empty() => vec![s.clone()],
                    Value::Array(_) => string_list(&value),
                    _ => {
                        return Err(NodeError::validation(format!(
                            "variable target '{path}' resolved to no recipients"
                        )));
                    }
                };
                Ok(recipients)
            }
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::{Flow, TriggerDescriptor};
    use crate::services::stub::StubMessaging;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn empty_flow() -> Arc<Flow> {
        Arc::new(Flow {
            id: "f1".to_string(),
            name: "t".to_string(),
            description: String::new(),
            enabled: true,
            nodes: vec![],
            edges: vec![],
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    fn exec(trigger: TriggerDescriptor) -> ExecutionContext {
        ExecutionContext::new(
            "exec-1",
            empty_flow(),
            json!({}),
            trigger,
            Duration::from_secs(30),
        )
    }

    #[test]
    fn target_parses_all_modes() {
        assert_eq!(
            DispatchTarget::from_config(&json!({})).unwrap(),
            DispatchTarget::Reply
        );
        assert_eq!(
            DispatchTarget::from_config(&json!({"target": {"mode": "specific", "recipients": ["a", "b"]}}))
                .unwrap(),
            DispatchTarget::Specific {
                recipients: vec!["a".to_string(), "b".to_string()]
            }
        );
        assert_eq!(
            DispatchTarget::from_config(&json!({"target": {"mode": "variable", "path": "variables.to"}}))
                .unwrap(),
            DispatchTarget::Variable {
                path: "variables.to".to_string()
            }
        );
        assert!(DispatchTarget::from_config(&json!({"target": {"mode": "variable"}})).is_err());
        assert!(DispatchTarget::from_config(&json!({"target": {"mode": "carrier-pigeon"}})).is_err());
    }

    #[tokio::test]
    async fn reply_routes_to_trigger_sender() {
        let messaging = Arc::new(StubMessaging::new());
        let bridge = DispatchBridge::new(messaging.clone());
        let exec = exec(TriggerDescriptor {
            kind: "message".to_string(),
            source: Some("whatsapp:555".to_string()),
            payload: Value::Null,
        });

        let report = bridge
            .dispatch(
                &exec,
                &DispatchTarget::Reply,
                "whatsapp",
                "pong",
                &SendOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(messaging.sent()[0].recipient, "whatsapp:555");
    }

    #[tokio::test]
    async fn reply_without_sender_is_validation_error() {
        let bridge = DispatchBridge::new(Arc::new(StubMessaging::new()));
        let exec = exec(TriggerDescriptor::manual());
        let err = bridge
            .dispatch(
                &exec,
                &DispatchTarget::Reply,
                "whatsapp",
                "pong",
                &SendOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn variable_target_resolves_list_from_scope() {
        let messaging = Arc::new(StubMessaging::new());
        let bridge = DispatchBridge::new(messaging.clone());
        let exec = exec(TriggerDescriptor::manual());
        exec.set_variable("audience", json!(["u1", "u2", "u3"]));

        let report = bridge
            .dispatch(
                &exec,
                &DispatchTarget::Variable {
                    path: "variables.audience".to_string(),
                },
                "telegram",
                "hi all",
                &SendOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.sent, 3);
        assert_eq!(messaging.sent().len(), 3);
    }

    #[tokio::test]
    async fn partial_failure_is_success_with_details() {
        let messaging = Arc::new(StubMessaging::new());
        messaging.fail_next(NodeError::external("recipient blocked us"));
        let bridge = DispatchBridge::new(messaging.clone());
        let exec = exec(TriggerDescriptor::manual());

        let report = bridge
            .dispatch(
                &exec,
                &DispatchTarget::Broadcast {
                    recipients: vec!["u1".to_string(), "u2".to_string()],
                },
                "telegram",
                "hi",
                &SendOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.results[0].success);
        assert!(report.results[0].error.as_ref().unwrap().contains("blocked"));
        assert!(report.results[1].success);
    }

    #[tokio::test]
    async fn wholly_failed_broadcast_is_external_error() {
        let messaging = Arc::new(StubMessaging::new());
        messaging.fail_next(NodeError::external("down"));
        messaging.fail_next(NodeError::external("down"));
        let bridge = DispatchBridge::new(messaging);
        let exec = exec(TriggerDescriptor::manual());

        let err = bridge
            .dispatch(
                &exec,
                &DispatchTarget::Broadcast {
                    recipients: vec!["u1".to_string(), "u2".to_string()],
                },
                "telegram",
                "hi",
                &SendOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::External);
        assert!(err.recoverable);
    }

    #[tokio::test]
    async fn zero_recipients_is_validation_error() {
        let bridge = DispatchBridge::new(Arc::new(StubMessaging::new()));
        let exec = exec(TriggerDescriptor::manual());
        let err = bridge
            .dispatch(
                &exec,
                &DispatchTarget::Specific { recipients: vec![] },
                "telegram",
                "hi",
                &SendOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }
}
