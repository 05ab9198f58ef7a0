use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TriggerDescriptor;
use crate::error::NodeError;

pub const MAX_EXECUTIONS_PER_FLOW: usize = 100;
pub const OUTPUT_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Status transitions are monotonic: pending → running → terminal.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match self {
            ExecutionStatus::Pending => matches!(
                next,
                ExecutionStatus::Running | ExecutionStatus::Cancelled
            ),
            ExecutionStatus::Running => next.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// Durable record of one `execute(flow, options)` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub flow_id: String,
    pub owner: String,
    pub trigger: TriggerDescriptor,
    pub input: Value,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub node_executions: Vec<NodeExecution>,
    pub error: Option<NodeError>,
    pub output: Value,
}

impl Execution {
    pub fn new(
        flow_id: impl Into<String>,
        owner: impl Into<String>,
        trigger: TriggerDescriptor,
        input: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_id: flow_id.into(),
            owner: owner.into(),
            trigger,
            input,
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            node_executions: vec![],
            error: None,
            output: Value::Null,
        }
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

/// Per-attempt record for a node. A node may appear multiple times
/// (retries, loop iterations), distinguished by `attempt` and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub node_id: String,
    pub node_type: String,
    pub status: NodeRunStatus,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub output_preview: Option<String>,
    pub error: Option<NodeError>,
}

impl NodeExecution {
    pub fn started(node_id: &str, node_type: &str, attempt: u32) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: NodeRunStatus::Running,
            attempt,
            started_at: Utc::now(),
            finished_at: None,
            output: None,
            output_preview: None,
            error: None,
        }
    }

    pub fn finish(
        &mut self,
        status: NodeRunStatus,
        output: Option<Value>,
        error: Option<NodeError>,
    ) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.output_preview = output.as_ref().map(preview);
        self.output = output;
        self.error = error;
    }
}

fn preview(output: &Value) -> String {
    let text = match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(&text, OUTPUT_PREVIEW_CHARS)
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
