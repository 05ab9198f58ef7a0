use async_trait::async_trait;
use serde_json::json;

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::flows::Node;
use crate::flows::parallel::ParallelMode;

/// Fan-out marker node. The executor validates the mode; the engine
/// detects `is_parallel()` and hands the outgoing branches to the
/// parallel manager, overwriting this node's output with the aggregate.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    fn type_name(&self) -> &'static str {
        "parallel"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        match node.config["mode"].as_str() {
            None | Some("ALL" | "all" | "RACE" | "race" | "FIRST_SUCCESS" | "first_success" | "firstSuccess") => {
                Vec::new()
            }
            Some(other) => vec![format!("unknown parallel mode '{other}'")],
        }
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let mode = ParallelMode::from_config(&ctx.data);
        NodeResult::ok(json!({"mode": mode.as_str()}))
    }

    fn is_parallel(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Position;
    use serde_json::{Value, json};

    fn node(config: Value) -> Node {
        Node {
            id: "p1".to_string(),
            node_type: "parallel".to_string(),
            subtype: None,
            config,
            label: String::new(),
            position: Position::default(),
        }
    }

    #[test]
    fn validate_accepts_known_modes() {
        let executor = ParallelExecutor;
        assert!(executor.validate(&node(json!({}))).is_empty());
        assert!(executor.validate(&node(json!({"mode": "RACE"}))).is_empty());
        assert!(!executor.validate(&node(json!({"mode": "SOME"}))).is_empty());
        assert!(executor.is_parallel());
    }
}
