use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::flows::Node;

/// Writes one variable (`name` + `value`) or a whole `variables` map into
/// the scope. Values are post-resolution, so `{{...}}` references work.
pub struct SetVariableExecutor;

#[async_trait]
impl NodeExecutor for SetVariableExecutor {
    fn type_name(&self) -> &'static str {
        "setVariable"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut problems = Vec::new();
        let has_single = node.config["name"].as_str().is_some();
        let has_map = node.config["variables"].is_object();
        if !has_single && !has_map {
            problems.push("setVariable requires 'name' or a 'variables' map".to_string());
        }
        if has_single && node.config.get("value").is_none() {
            problems.push("setVariable with 'name' requires 'value'".to_string());
        }
        problems
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let mut updates: HashMap<String, Value> = HashMap::new();

        if let Some(name) = ctx.data["name"].as_str() {
            updates.insert(
                name.to_string(),
                ctx.data.get("value").cloned().unwrap_or(Value::Null),
            );
        }
        if let Some(map) = ctx.data["variables"].as_object() {
            for (name, value) in map {
                updates.insert(name.clone(), value.clone());
            }
        }

        let output = json!({"set": updates.keys().cloned().collect::<Vec<_>>()});
        NodeResult::ok(output).with_variables(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Position;

    fn node(config: Value) -> Node {
        Node {
            id: "v1".to_string(),
            node_type: "setVariable".to_string(),
            subtype: None,
            config,
            label: String::new(),
            position: Position::default(),
        }
    }

    #[test]
    fn validate_requires_name_or_map() {
        let executor = SetVariableExecutor;
        assert!(!executor.validate(&node(json!({}))).is_empty());
        assert!(
            executor
                .validate(&node(json!({"name": "x", "value": 1})))
                .is_empty()
        );
        assert!(
            executor
                .validate(&node(json!({"variables": {"a": 1}})))
                .is_empty()
        );
        assert!(!executor.validate(&node(json!({"name": "x"}))).is_empty());
    }
}
