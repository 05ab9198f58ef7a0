use async_trait::async_trait;
use serde_json::{Value, json};

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::flows::Node;

const OPERATORS: &[&str] = &[
    "eq", "neq", "gt", "gte", "lt", "lte", "contains", "exists", "truthy",
];

/// Evaluates `left <operator> right` against resolved config and routes
/// down the `true` or `false` edge.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn type_name(&self) -> &'static str {
        "condition"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        let mut problems = Vec::new();
        let operator = node.config["operator"].as_str().unwrap_or("eq");
        if !OPERATORS.contains(&operator) {
            problems.push(format!("unknown operator '{operator}'"));
        }
        if node.config.get("left").is_none() {
            problems.push("condition requires 'left'".to_string());
        }
        let needs_right = !matches!(operator, "exists" | "truthy");
        if needs_right && node.config.get("right").is_none() {
            problems.push(format!("operator '{operator}' requires 'right'"));
        }
        problems
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let left = ctx.data.get("left").cloned().unwrap_or(Value::Null);
        let right = ctx.data.get("right").cloned().unwrap_or(Value::Null);
        let operator = ctx.data["operator"].as_str().unwrap_or("eq");

        let outcome = evaluate(operator, &left, &right);
        let branch = if outcome { "true" } else { "false" };

        NodeResult::ok(json!({
            "result": outcome,
            "left": left,
            "right": right,
            "operator": operator,
        }))
        .with_branches(vec![branch.to_string()])
    }
}

fn evaluate(operator: &str, left: &Value, right: &Value) -> bool {
    match operator {
        "eq" => loose_eq(left, right),
        "neq" => !loose_eq(left, right),
        "gt" | "gte" | "lt" | "lte" => {
            let (Some(l), Some(r)) = (as_number(left), as_number(right)) else {
                return false;
            };
            match operator {
                "gt" => l > r,
                "gte" => l >= r,
                "lt" => l < r,
                _ => l <= r,
            }
        }
        "contains" => match (left, right) {
            (Value::String(l), Value::String(r)) => l.contains(r.as_str()),
            (Value::Array(items), needle) => items.iter().any(|v| loose_eq(v, needle)),
            _ => false,
        },
        "exists" => !left.is_null(),
        "truthy" => truthy(left),
        _ => false,
    }
}

/// Editor configs compare typed scope values against string literals, so
/// `3 == "3"` holds.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => as_comparable_string(left) == as_comparable_string(right),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_comparable_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
