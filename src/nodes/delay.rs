use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::{NodeCtx, NodeExecutor, NodeResult};
use crate::flows::Node;

/// Deliberate pause. Yields the worker and wakes early on cancellation
/// or the execution deadline.
pub struct DelayExecutor;

fn duration_from(config: &serde_json::Value) -> Option<Duration> {
    if let Some(ms) = config["durationMs"].as_u64() {
        return Some(Duration::from_millis(ms));
    }
    config["durationSeconds"]
        .as_f64()
        .filter(|s| *s >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn type_name(&self) -> &'static str {
        "delay"
    }

    fn validate(&self, node: &Node) -> Vec<String> {
        match duration_from(&node.config) {
            Some(_) => Vec::new(),
            None => vec!["delay requires 'durationMs' or 'durationSeconds'".to_string()],
        }
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let Some(duration) = duration_from(&ctx.data) else {
            return NodeResult::fail(crate::error::NodeError::validation(
                "delay requires 'durationMs' or 'durationSeconds'",
            ));
        };

        match ctx.exec.sleep_checked(duration).await {
            Ok(()) => NodeResult::ok(json!({"delayedMs": duration.as_millis() as u64})),
            Err(error) => NodeResult::fail(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_both_duration_forms() {
        assert_eq!(
            duration_from(&json!({"durationMs": 1500})),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            duration_from(&json!({"durationSeconds": 2.5})),
            Some(Duration::from_millis(2500))
        );
        assert_eq!(duration_from(&json!({})), None);
        assert_eq!(duration_from(&json!({"durationSeconds": -1})), None);
    }
}
