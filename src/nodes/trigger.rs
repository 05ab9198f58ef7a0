use async_trait::async_trait;
use serde_json::json;

use super::{NodeCtx, NodeExecutor, NodeResult};

/// Entry node. The trigger already fired by the time the engine runs;
/// this executor just surfaces the trigger descriptor and input so
/// downstream nodes can reference `nodes.<id>`.
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    fn type_name(&self) -> &'static str {
        "trigger"
    }

    async fn execute(&self, ctx: NodeCtx<'_>) -> NodeResult {
        let (trigger, input) = ctx.exec.with_scope(|scope| {
            (
                serde_json::to_value(&scope.trigger).unwrap_or_default(),
                scope.input.clone(),
            )
        });
        NodeResult::ok(json!({"trigger": trigger, "input": input}))
    }
}
