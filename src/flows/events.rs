use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Progress event broadcast at every lifecycle boundary.
///
/// Delivery is best-effort: the engine drops events when no receiver is
/// attached or a receiver lags behind the channel capacity.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    pub execution_id: String,
    pub flow_id: String,
    pub timestamp: DateTime<Utc>,
    pub node_id: Option<String>,
    pub event_type: RunEventType,
    /// Sanitized snapshot of the relevant record (status, preview, error
    /// kind), never full node outputs.
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventType {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
}

impl RunEventType {
    pub fn as_wire_event(&self) -> &'static str {
        match self {
            RunEventType::ExecutionStarted => "execution:started",
            RunEventType::ExecutionCompleted => "execution:completed",
            RunEventType::ExecutionFailed => "execution:failed",
            RunEventType::ExecutionCancelled => "execution:cancelled",
            RunEventType::NodeStarted => "node:started",
            RunEventType::NodeCompleted => "node:completed",
            RunEventType::NodeFailed => "node:failed",
        }
    }
}
