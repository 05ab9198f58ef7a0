pub mod context;
pub mod dispatch;
pub mod events;
pub mod file_repository;
pub mod history;
pub mod parallel;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod runner;
pub mod scheduler;
pub mod scope;
pub mod wait;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Flow {
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outgoing edges of a node, in the flow's declared edge order.
    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    pub fn has_incoming(&self, node_id: &str) -> bool {
        self.edges.iter().any(|e| e.target == node_id)
    }

    /// Nodes with no outgoing edges. Their last outputs make up part of the
    /// final execution output.
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| self.outgoing(&n.id).is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Type tag used for executor lookup, e.g. `trigger`, `ai`,
    /// `messaging`. May already be compound (`messaging:sendText`).
    pub node_type: String,
    /// Optional subtype refining the type, e.g. `chatCompletion`.
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub position: Position,
}

impl Node {
    /// Display name for logs: label if the editor set one, id otherwise.
    pub fn display(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Optional branch label (`true`, `false`, `failed`, `timeout`,
    /// `reply`, ...). Unlabeled edges are always taken.
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Descriptor of what initiated a run. Opaque to the engine; exposed to
/// nodes under the `trigger` scope root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDescriptor {
    /// `manual`, `schedule`, `webhook`, `message`, ...
    pub kind: String,
    /// Originating channel or sender, when there is one.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl TriggerDescriptor {
    pub fn manual() -> Self {
        Self {
            kind: "manual".to_string(),
            source: None,
            payload: Value::Null,
        }
    }
}
