pub mod ai;
pub mod condition;
pub mod delay;
pub mod loop_node;
pub mod parallel;
pub mod send;
pub mod trigger;
pub mod variable;
pub mod wait_reply;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::NodeError;
use crate::flows::Node;
use crate::flows::context::ExecutionContext;
use crate::flows::wait::WaitCoordinator;
use crate::services::Services;

/// Structured outcome of one executor call.
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<NodeError>,
    /// When false, traversal stops after recording the result.
    pub proceed: bool,
    /// Explicit edge labels overriding default branching.
    pub next_branches: Option<Vec<String>>,
    /// Merged into the scope's variables after a successful execution.
    pub variable_updates: Option<HashMap<String, Value>>,
}

impl NodeResult {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            proceed: true,
            next_branches: None,
            variable_updates: None,
        }
    }

    pub fn fail(error: NodeError) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error),
            proceed: false,
            next_branches: None,
            variable_updates: None,
        }
    }

    /// Synthetic success for nodes the registry cannot resolve or a
    /// `skip` strategy outcome.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::ok(json!({"skipped": true, "reason": reason.into()}))
    }

    /// Successful result that ends the traversal.
    pub fn halt(output: Value) -> Self {
        Self {
            proceed: false,
            ..Self::ok(output)
        }
    }

    pub fn with_branches(mut self, branches: Vec<String>) -> Self {
        self.next_branches = Some(branches);
        self
    }

    pub fn with_variables(mut self, updates: HashMap<String, Value>) -> Self {
        self.variable_updates = Some(updates);
        self
    }
}

/// View over the execution context handed to an executor: the node,
/// its config after variable resolution, the collaborator bundle, the
/// wait coordinator, and (for advanced nodes) the raw scope.
pub struct NodeCtx<'a> {
    pub node: &'a Node,
    /// Node configuration, post variable-resolution.
    pub data: Value,
    pub exec: &'a ExecutionContext,
    pub services: &'a Services,
    pub wait: &'a WaitCoordinator,
}

/// Contract every node kind implements.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Identifier used for registration. May be compound
    /// (`messaging:sendText`).
    fn type_name(&self) -> &'static str;

    /// Human-readable problems with the node's configuration; empty means
    /// valid. Called before every execution.
    fn validate(&self, _node: &Node) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult;

    /// True for nodes whose multi-edge fan-out runs branches
    /// concurrently rather than sequentially.
    fn is_parallel(&self) -> bool {
        false
    }

    /// True for nodes whose body subtree re-runs per iteration.
    fn is_loop(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_proceeds_by_default() {
        let result = NodeResult::ok(json!({"a": 1}));
        assert!(result.success);
        assert!(result.proceed);
        assert!(result.error.is_none());
    }

    #[test]
    fn fail_stops_traversal() {
        let result = NodeResult::fail(NodeError::external("x"));
        assert!(!result.success);
        assert!(!result.proceed);
        assert!(result.error.is_some());
    }

    #[test]
    fn skipped_carries_reason() {
        let result = NodeResult::skipped("no executor for 'mystery'");
        assert!(result.success);
        assert_eq!(result.output["skipped"], json!(true));
        assert!(
            result.output["reason"]
                .as_str()
                .unwrap()
                .contains("mystery")
        );
    }

    #[test]
    fn builders_attach_branches_and_variables() {
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), json!(1));
        let result = NodeResult::ok(Value::Null)
            .with_branches(vec!["true".to_string()])
            .with_variables(vars);
        assert_eq!(result.next_branches.as_deref().unwrap(), ["true"]);
        assert_eq!(result.variable_updates.unwrap()["x"], json!(1));
    }
}
