use async_trait::async_trait;
use serde_json::{Value, json};

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::error::NodeError;
use crate::flows::Node;

/// Iteration marker node. The engine detects `is_loop()` and re-runs the
/// `body` edge's subtree once per item, with `variables.<itemVar>` and
/// `variables.<indexVar>` set, then follows the `done` edge. Iterations
/// are sequential; a body node returning `continue=false` breaks.
pub struct LoopExecutor;

/// Items to iterate: an `items` array (literal or resolved from a
/// `{{path}}` reference), or `count` repetitions of the index.
pub fn parse_items(data: &Value) -> Result<Vec<Value>, NodeError> {
    if let Some(items) = data["items"].as_array() {
        return Ok(items.clone());
    }
    if let Some(count) = data["count"].as_u64() {
        return Ok((0..count).map(|i| json!(i)).collect());
    }
    Err(NodeError::validation(
        "loop requires an 'items' array or a 'count'",
    ))
}

pub fn item_var(data: &Value) -> String {
    data["itemVar"].as_str().unwrap_or("item").to_string()
}

pub fn index_var(data: &Value) -> String {
    data["indexVar"].as_str().unwrap_or("index").to_string()
}

#[async_trait]
impl NodeExecutor for LoopExecutor {
    fn type_name(&self) -> &'static str {
        "loop"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let has_items =
            node.config["items"].is_array() || node.config["items"].as_str().is_some();
        let has_count = node.config["count"].as_u64().is_some();
        if has_items || has_count {
            Vec::new()
        } else {
            vec!["loop requires an 'items' array or a 'count'".to_string()]
        }
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        match parse_items(&ctx.data) {
            Ok(items) => NodeResult::ok(json!({"iterations": items.len()})),
            Err(error) => NodeResult::fail(error),
        }
    }

    fn is_loop(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_items_array() {
        let items = parse_items(&json!({"items": ["a", "b"]})).unwrap();
        assert_eq!(items, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn parses_count_as_indices() {
        let items = parse_items(&json!({"count": 3})).unwrap();
        assert_eq!(items, vec![json!(0), json!(1), json!(2)]);
    }

    #[test]
    fn missing_spec_is_validation_error() {
        let err = parse_items(&json!({})).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[test]
    fn custom_variable_names() {
        let data = json!({"itemVar": "row", "indexVar": "i"});
        assert_eq!(item_var(&data), "row");
        assert_eq!(index_var(&data), "i");
        assert_eq!(item_var(&json!({})), "item");
        assert_eq!(index_var(&json!({})), "index");
    }
}
