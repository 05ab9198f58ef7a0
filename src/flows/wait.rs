use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};

use super::context::ExecutionContext;
use crate::error::NodeError;
use crate::services::messaging::{InboundMessage, Messaging};

/// Content predicate a candidate inbound message must pass.
#[derive(Debug, Clone)]
pub enum MatchPredicate {
    Any,
    Exact { value: String, case_insensitive: bool },
    Contains { value: String, case_insensitive: bool },
    StartsWith { value: String, case_insensitive: bool },
    Regex(regex::Regex),
    /// Exact equality against a button/callback payload.
    Button { value: String },
}

impl MatchPredicate {
    /// Parse from wait-node config (`matchType`, `matchValue`,
    /// `caseInsensitive`).
    pub fn from_config(config: &serde_json::Value) -> Result<Self, String> {
        let match_type = config["matchType"].as_str().unwrap_or("any");
        let case_insensitive = config["caseInsensitive"].as_bool().unwrap_or(false);
        let value = || -> Result<String, String> {
            config["matchValue"]
                .as_str()
                .map(String::from)
                .ok_or_else(|| format!("matchType '{match_type}' requires 'matchValue'"))
        };

        match match_type {
            "any" => Ok(MatchPredicate::Any),
            "exact" => Ok(MatchPredicate::Exact {
                value: value()?,
                case_insensitive,
            }),
            "contains" => Ok(MatchPredicate::Contains {
                value: value()?,
                case_insensitive,
            }),
            "startsWith" | "starts-with" => Ok(MatchPredicate::StartsWith {
                value: value()?,
                case_insensitive,
            }),
            "regex" => {
                let pattern = value()?;
                let pattern = if case_insensitive {
                    format!("(?i){pattern}")
                } else {
                    pattern
                };
                regex::Regex::new(&pattern)
                    .map(MatchPredicate::Regex)
                    .map_err(|e| format!("invalid regex: {e}"))
            }
            "button" => Ok(MatchPredicate::Button { value: value()? }),
            other => Err(format!("unknown matchType '{other}'")),
        }
    }

    pub fn matches(&self, message: &InboundMessage) -> bool {
        fn fold(s: &str, ci: bool) -> String {
            if ci { s.to_lowercase() } else { s.to_string() }
        }
        match self {
            MatchPredicate::Any => true,
            MatchPredicate::Exact {
                value,
                case_insensitive,
            } => fold(&message.content, *case_insensitive) == fold(value, *case_insensitive),
            MatchPredicate::Contains {
                value,
                case_insensitive,
            } => fold(&message.content, *case_insensitive)
                .contains(&fold(value, *case_insensitive)),
            MatchPredicate::StartsWith {
                value,
                case_insensitive,
            } => fold(&message.content, *case_insensitive)
                .starts_with(&fold(value, *case_insensitive)),
            MatchPredicate::Regex(re) => re.is_match(&message.content),
            MatchPredicate::Button { value } => {
                message.callback_data.as_deref() == Some(value.as_str())
            }
        }
    }
}

/// A registered intention to pause until an inbound message matches.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub execution_id: String,
    pub node_id: String,
    /// `None` matches any channel.
    pub channel: Option<String>,
    pub sender: Option<String>,
    pub conversation: Option<String>,
    pub predicate: MatchPredicate,
    pub retry_on_invalid: bool,
    pub retry_limit: u32,
    /// Prompt sent to a responder whose reply failed validation.
    pub retry_prompt: Option<String>,
}

/// Terminal outcome of a wait, routed to distinct branch labels.
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Reply(InboundMessage),
    Invalid {
        last_message: Option<InboundMessage>,
        retries_used: u32,
    },
    Timeout,
}

pub struct WaitHandle {
    pub wait_id: String,
    receiver: oneshot::Receiver<WaitOutcome>,
}

struct RegisteredWait {
    wait_id: String,
    seq: u64,
    spec: WaitSpec,
    retries_used: u32,
    resolver: oneshot::Sender<WaitOutcome>,
}

/// Suspends traversals until a matching inbound message arrives or the
/// deadline elapses. Registration, matching and removal all happen under
/// one table lock: match-and-resolve is atomic, and a resolved wait is
/// gone before the inbound could be offered to the next candidate.
pub struct WaitCoordinator {
    messaging: Arc<dyn Messaging>,
    waits: Mutex<Vec<RegisteredWait>>,
    seq: AtomicU64,
    poll_interval: Duration,
}

impl WaitCoordinator {
    pub fn new(messaging: Arc<dyn Messaging>, poll_interval: Duration) -> Self {
        Self {
            messaging,
            waits: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
            poll_interval,
        }
    }

    pub async fn register(&self, spec: WaitSpec) -> WaitHandle {
        let (tx, rx) = oneshot::channel();
        let wait_id = uuid::Uuid::new_v4().to_string();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.waits.lock().await.push(RegisteredWait {
            wait_id: wait_id.clone(),
            seq,
            spec,
            retries_used: 0,
            resolver: tx,
        });
        tracing::debug!(wait_id = %wait_id, "Wait registered");
        WaitHandle {
            wait_id,
            receiver: rx,
        }
    }

    /// Suspend until the wait resolves, the timeout elapses, or the
    /// execution is cancelled. Poll ticks count against the timeout; the
    /// deadline is absolute from the moment this is called.
    pub async fn await_outcome(
        &self,
        handle: WaitHandle,
        exec: &ExecutionContext,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, NodeError> {
        let wait_deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut receiver = handle.receiver;

        loop {
            if let Err(err) = exec.checkpoint() {
                self.remove(&handle.wait_id).await;
                return Err(err);
            }
            if let Some(deadline) = wait_deadline {
                if tokio::time::Instant::now() >= deadline {
                    self.remove(&handle.wait_id).await;
                    return Ok(WaitOutcome::Timeout);
                }
            }

            let mut tick = tokio::time::Instant::now() + self.poll_interval;
            if let Some(deadline) = wait_deadline {
                tick = tick.min(deadline);
            }
            tick = tick.min(exec.deadline());

            let cancel_token = exec.cancel_token();
            tokio::select! {
                outcome = &mut receiver => {
                    return match outcome {
                        Ok(outcome) => Ok(outcome),
                        // Coordinator dropped the wait without resolving.
                        Err(_) => Ok(WaitOutcome::Timeout),
                    };
                }
                _ = cancel_token.cancelled() => {
                    self.remove(&handle.wait_id).await;
                    return Err(exec
                        .abort_reason()
                        .unwrap_or_else(|| NodeError::cancelled("execution cancelled")));
                }
                _ = tokio::time::sleep_until(tick) => {
                    // Cooperative checkpoint; loop re-evaluates deadlines.
                }
            }
        }
    }

    /// Offer an inbound message. Returns true when a wait consumed it.
    /// The earliest-registered candidate wins; messages matching no wait
    /// are left for other subsystems.
    pub async fn deliver_inbound(&self, message: &InboundMessage) -> bool {
        enum Action {
            Resolved,
            RetryPrompt { wait_id: String, prompt: String },
        }

        let action = {
            let mut waits = self.waits.lock().await;
            let candidate = waits
                .iter_mut()
                .filter(|w| is_candidate(&w.spec, message))
                .min_by_key(|w| w.seq);

            let Some(wait) = candidate else {
                return false;
            };

            if wait.spec.predicate.matches(message) {
                let wait_id = wait.wait_id.clone();
                let resolved = remove_by_id(&mut waits, &wait_id);
                if let Some(resolved) = resolved {
                    let _ = resolved.resolver.send(WaitOutcome::Reply(message.clone()));
                }
                Action::Resolved
            } else {
                wait.retries_used += 1;
                if wait.spec.retry_on_invalid && wait.retries_used < wait.spec.retry_limit {
                    let prompt = wait
                        .spec
                        .retry_prompt
                        .clone()
                        .unwrap_or_else(|| "That wasn't one of the expected options.".to_string());
                    Action::RetryPrompt {
                        wait_id: wait.wait_id.clone(),
                        prompt,
                    }
                } else {
                    let retries_used = wait.retries_used;
                    let wait_id = wait.wait_id.clone();
                    let resolved = remove_by_id(&mut waits, &wait_id);
                    if let Some(resolved) = resolved {
                        let _ = resolved.resolver.send(WaitOutcome::Invalid {
                            last_message: Some(message.clone()),
                            retries_used,
                        });
                    }
                    Action::Resolved
                }
            }
        };

        if let Action::RetryPrompt { wait_id, prompt } = action {
            if let Err(e) = self.messaging.send_retry_prompt(&wait_id, &prompt).await {
                tracing::warn!(wait_id = %wait_id, error = %e, "Retry prompt delivery failed");
            }
        }
        true
    }

    /// Drop every registration belonging to an execution (used when the
    /// context terminates).
    pub async fn discard_execution(&self, execution_id: &str) {
        let mut waits = self.waits.lock().await;
        waits.retain(|w| w.spec.execution_id != execution_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.waits.lock().await.len()
    }

    async fn remove(&self, wait_id: &str) {
        let mut waits = self.waits.lock().await;
        remove_by_id(&mut waits, wait_id);
    }
}

fn is_candidate(spec: &WaitSpec, message: &InboundMessage) -> bool {
    if let Some(channel) = &spec.channel {
        if channel != &message.channel {
            return false;
        }
    }
    if let Some(sender) = &spec.sender {
        if sender != &message.sender {
            return false;
        }
    }
    if let Some(conversation) = &spec.conversation {
        if message.conversation_id.as_ref() != Some(conversation) {
            return false;
        }
    }
    true
}

fn remove_by_id(waits: &mut Vec<RegisteredWait>, wait_id: &str) -> Option<RegisteredWait> {
    let index = waits.iter().position(|w| w.wait_id == wait_id)?;
    Some(waits.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::{Flow, TriggerDescriptor};
    use crate::services::stub::StubMessaging;
    use chrono::Utc;
    use serde_json::json;

    fn inbound(channel: &str, sender: &str, content: &str) -> InboundMessage {
        InboundMessage {
            channel: channel.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            sender: sender.to_string(),
            conversation_id: None,
            content: content.to_string(),
            timestamp: Utc::now(),
            callback_data: None,
        }
    }

    fn spec(channel: Option<&str>, sender: Option<&str>, predicate: MatchPredicate) -> WaitSpec {
        WaitSpec {
            execution_id: "exec-1".to_string(),
            node_id: "w1".to_string(),
            channel: channel.map(String::from),
            sender: sender.map(String::from),
            conversation: None,
            predicate,
            retry_on_invalid: false,
            retry_limit: 0,
            retry_prompt: None,
        }
    }

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

    fn exec_ctx(timeout: Duration) -> ExecutionContext {
        ExecutionContext::new(
            "exec-1",
            empty_flow(),
            json!({}),
            TriggerDescriptor::manual(),
            timeout,
        )
    }

    fn coordinator() -> (Arc<StubMessaging>, WaitCoordinator) {
        let messaging = Arc::new(StubMessaging::new());
        let coordinator =
            WaitCoordinator::new(messaging.clone(), Duration::from_millis(50));
        (messaging, coordinator)
    }

    #[test]
    fn predicate_parsing_and_matching() {
        let p = MatchPredicate::from_config(&json!({"matchType": "exact", "matchValue": "Yes", "caseInsensitive": true})).unwrap();
        assert!(p.matches(&inbound("telegram", "1", "yes")));
        assert!(!p.matches(&inbound("telegram", "1", "yess")));

        let p = MatchPredicate::from_config(&json!({"matchType": "contains", "matchValue": "ship"})).unwrap();
        assert!(p.matches(&inbound("telegram", "1", "please ship it")));

        let p = MatchPredicate::from_config(&json!({"matchType": "startsWith", "matchValue": "ok"})).unwrap();
        assert!(p.matches(&inbound("telegram", "1", "ok then")));
        assert!(!p.matches(&inbound("telegram", "1", "not ok")));

        let p = MatchPredicate::from_config(&json!({"matchType": "regex", "matchValue": "^[0-9]{3}$"})).unwrap();
        assert!(p.matches(&inbound("telegram", "1", "123")));
        assert!(!p.matches(&inbound("telegram", "1", "12a")));

        let p = MatchPredicate::from_config(&json!({"matchType": "button", "matchValue": "yes"})).unwrap();
        let mut msg = inbound("telegram", "1", "pressed");
        assert!(!p.matches(&msg));
        msg.callback_data = Some("yes".to_string());
        assert!(p.matches(&msg));

        assert!(MatchPredicate::from_config(&json!({"matchType": "exact"})).is_err());
        assert!(MatchPredicate::from_config(&json!({"matchType": "regex", "matchValue": "("})).is_err());
        assert!(MatchPredicate::from_config(&json!({"matchType": "telepathy", "matchValue": "x"})).is_err());
    }

    #[tokio::test]
    async fn reply_resolves_matching_wait() {
        let (_messaging, coordinator) = coordinator();
        let exec = exec_ctx(Duration::from_secs(5));
        let handle = coordinator
            .register(spec(Some("telegram"), Some("123"), MatchPredicate::Any))
            .await;

        assert!(coordinator.deliver_inbound(&inbound("telegram", "123", "hello")).await);
        let outcome = coordinator
            .await_outcome(handle, &exec, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        let WaitOutcome::Reply(message) = outcome else {
            panic!("expected reply");
        };
        assert_eq!(message.content, "hello");
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn non_candidates_are_ignored() {
        let (_messaging, coordinator) = coordinator();
        let _handle = coordinator
            .register(spec(Some("telegram"), Some("123"), MatchPredicate::Any))
            .await;

        assert!(!coordinator.deliver_inbound(&inbound("whatsapp", "123", "x")).await);
        assert!(!coordinator.deliver_inbound(&inbound("telegram", "999", "x")).await);
        assert_eq!(coordinator.pending_count().await, 1);
    }

    #[tokio::test]
    async fn earliest_registered_wait_wins() {
        let (_messaging, coordinator) = coordinator();
        let exec = exec_ctx(Duration::from_secs(5));
        let first = coordinator
            .register(spec(Some("telegram"), None, MatchPredicate::Any))
            .await;
        let _second = coordinator
            .register(spec(Some("telegram"), None, MatchPredicate::Any))
            .await;

        coordinator.deliver_inbound(&inbound("telegram", "1", "hi")).await;
        let outcome = coordinator
            .await_outcome(first, &exec, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Reply(_)));
        // The later wait stays registered.
        assert_eq!(coordinator.pending_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_reply_retries_then_resolves_invalid() {
        let (messaging, coordinator) = coordinator();
        let exec = exec_ctx(Duration::from_secs(5));
        let mut wait = spec(
            Some("telegram"),
            Some("123"),
            MatchPredicate::Button {
                value: "yes".to_string(),
            },
        );
        wait.retry_on_invalid = true;
        wait.retry_limit = 2;
        wait.retry_prompt = Some("Pick yes or no".to_string());
        let handle = coordinator.register(wait).await;

        // First invalid: retry prompt, wait stays registered.
        coordinator.deliver_inbound(&inbound("telegram", "123", "maybe")).await;
        assert_eq!(coordinator.pending_count().await, 1);
        assert_eq!(messaging.retry_prompts().len(), 1);
        assert_eq!(messaging.retry_prompts()[0].1, "Pick yes or no");

        // Second invalid hits the limit: resolves invalid.
        coordinator.deliver_inbound(&inbound("telegram", "123", "nope")).await;
        let outcome = coordinator
            .await_outcome(handle, &exec, Some(Duration::from_secs(1)))
            .await
            .unwrap();
        let WaitOutcome::Invalid { retries_used, last_message } = outcome else {
            panic!("expected invalid");
        };
        assert_eq!(retries_used, 2);
        assert_eq!(last_message.unwrap().content, "nope");
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_after_deadline() {
        let (_messaging, coordinator) = coordinator();
        let exec = exec_ctx(Duration::from_secs(60));
        let handle = coordinator
            .register(spec(Some("telegram"), None, MatchPredicate::Any))
            .await;

        let outcome = tokio::spawn(async move {
            // Move the coordinator borrow into a scope that owns it.
            outcome_of(coordinator, handle, exec).await
        });
        let outcome = outcome.await.unwrap();
        assert!(matches!(outcome, WaitOutcome::Timeout));
    }

    async fn outcome_of(
        coordinator: WaitCoordinator,
        handle: WaitHandle,
        exec: ExecutionContext,
    ) -> WaitOutcome {
        coordinator
            .await_outcome(handle, &exec, Some(Duration::from_millis(200)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn zero_timeout_completes_immediately() {
        let (_messaging, coordinator) = coordinator();
        let exec = exec_ctx(Duration::from_secs(5));
        let handle = coordinator
            .register(spec(None, None, MatchPredicate::Any))
            .await;
        let outcome = coordinator
            .await_outcome(handle, &exec, Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(matches!(outcome, WaitOutcome::Timeout));
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn cancellation_discards_registration() {
        let (_messaging, coordinator) = coordinator();
        let exec = exec_ctx(Duration::from_secs(5));
        let handle = coordinator
            .register(spec(None, None, MatchPredicate::Any))
            .await;
        exec.abort(crate::error::NodeError::cancelled("stop"));
        let err = coordinator
            .await_outcome(handle, &exec, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Cancelled);
        assert_eq!(coordinator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn discard_execution_clears_registrations() {
        let (_messaging, coordinator) = coordinator();
        coordinator.register(spec(None, None, MatchPredicate::Any)).await;
        coordinator.register(spec(None, None, MatchPredicate::Any)).await;
        coordinator.discard_execution("exec-1").await;
        assert_eq!(coordinator.pending_count().await, 0);
    }
}
