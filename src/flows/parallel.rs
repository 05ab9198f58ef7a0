use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use super::context::ExecutionContext;
use crate::error::NodeError;

/// Aggregation mode for a parallel fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelMode {
    /// Wait for every branch; fail (cancelling the rest) on the first
    /// failure unless `continue_on_error`.
    All { continue_on_error: bool },
    /// First branch to finish wins, whether it succeeded or failed.
    Race,
    /// First successful branch wins; fail only if all branches fail.
    FirstSuccess,
}

impl ParallelMode {
    pub fn from_config(config: &Value) -> Self {
        let continue_on_error = config["continueOnError"].as_bool().unwrap_or(false);
        match config["mode"].as_str().unwrap_or("ALL") {
            "RACE" | "race" => ParallelMode::Race,
            "FIRST_SUCCESS" | "first_success" | "firstSuccess" => ParallelMode::FirstSuccess,
            _ => ParallelMode::All { continue_on_error },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParallelMode::All { .. } => "ALL",
            ParallelMode::Race => "RACE",
            ParallelMode::FirstSuccess => "FIRST_SUCCESS",
        }
    }
}

/// Per-branch aggregate entry, reported in input order for ALL.
#[derive(Debug, Clone)]
struct BranchReport {
    node_id: String,
    output: Value,
    error: Option<NodeError>,
}

/// A branch traversal: given the branch's start node and its child
/// context, walk the subtree to completion.
pub type BranchRunner =
    dyn Fn(String, Arc<ExecutionContext>) -> BoxFuture<'static, Result<(), NodeError>>
        + Send
        + Sync;

/// Runs a set of branches concurrently with isolated child contexts and
/// aggregates per the mode. Fan-out is bounded by the per-node cap and a
/// process-wide semaphore; excess branches queue FIFO.
pub struct ParallelManager {
    max_branches: usize,
    global_cap: Arc<Semaphore>,
}

impl ParallelManager {
    pub fn new(max_branches: usize, global_cap: Arc<Semaphore>) -> Self {
        Self {
            max_branches: max_branches.max(1),
            global_cap,
        }
    }

    /// Execute `branch_ids` as concurrent branches of `parent`.
    ///
    /// On success, winning overlays merge into the parent (variables
    /// last-writer-wins, outputs by node-id); losing or discarded
    /// branches contribute only their records. Returns the parallel
    /// node's aggregate output.
    pub async fn execute(
        &self,
        parent: &ExecutionContext,
        branch_ids: Vec<String>,
        mode: ParallelMode,
        run: &BranchRunner,
    ) -> Result<Value, NodeError> {
        if branch_ids.is_empty() {
            // Zero-branch parallel is a no-op success.
            return Ok(json!({"mode": mode.as_str(), "branches": []}));
        }

        parent.checkpoint()?;

        let local_cap = Arc::new(Semaphore::new(self.max_branches));
        let mut children: Vec<Arc<ExecutionContext>> = Vec::with_capacity(branch_ids.len());
        let mut futures = FuturesUnordered::new();

        for (index, node_id) in branch_ids.iter().enumerate() {
            let child = Arc::new(parent.fork());
            children.push(child.clone());

            let local_cap = local_cap.clone();
            let global_cap = self.global_cap.clone();
            let node_id = node_id.clone();
            let branch = run(node_id.clone(), child.clone());
            futures.push(async move {
                let _local = local_cap.acquire_owned().await;
                let _global = global_cap.acquire_owned().await;
                if child.is_cancelled() {
                    return (index, node_id, Err(child
                        .abort_reason()
                        .unwrap_or_else(|| NodeError::cancelled("branch cancelled"))));
                }
                let result = branch.await;
                (index, node_id, result)
            });
        }

        match mode {
            ParallelMode::All { continue_on_error } => {
                self.run_all(parent, &children, &mut futures, continue_on_error, mode)
                    .await
            }
            ParallelMode::Race => self.run_race(parent, &children, &mut futures).await,
            ParallelMode::FirstSuccess => {
                self.run_first_success(parent, &children, &mut futures).await
            }
        }
    }

    async fn run_all(
        &self,
        parent: &ExecutionContext,
        children: &[Arc<ExecutionContext>],
        futures: &mut FuturesUnordered<
            impl Future<Output = (usize, String, Result<(), NodeError>)>,
        >,
        continue_on_error: bool,
        mode: ParallelMode,
    ) -> Result<Value, NodeError> {
        let mut reports: Vec<Option<BranchReport>> = vec![None; children.len()];
        let mut first_error: Option<NodeError> = None;

        while let Some((index, node_id, result)) = futures.next().await {
            match result {
                Ok(()) => {
                    reports[index] = Some(BranchReport {
                        node_id,
                        output: children[index].last_completed_output(),
                        error: None,
                    });
                }
                Err(error) => {
                    reports[index] = Some(BranchReport {
                        node_id,
                        output: Value::Null,
                        error: Some(error.clone()),
                    });
                    if first_error.is_none() && !error.bypasses_strategies() {
                        first_error = Some(error.clone());
                    }
                    if !continue_on_error {
                        cancel_siblings(children, index);
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                }
            }
        }

        if let Some(cause) = first_error {
            if !continue_on_error {
                // Failed aggregation discards overlays; history survives.
                for child in children {
                    parent.adopt_records(child);
                }
                return Err(NodeError {
                    kind: cause.kind,
                    message: format!("parallel branch failed: {}", cause.message),
                    recoverable: cause.recoverable,
                });
            }
        }

        for (index, child) in children.iter().enumerate() {
            let failed = reports[index].as_ref().is_some_and(|r| r.error.is_some());
            if failed {
                parent.adopt_records(child);
            } else {
                parent.merge_child(child);
            }
        }

        Ok(json!({
            "mode": mode.as_str(),
            "branches": reports
                .into_iter()
                .flatten()
                .map(report_json)
                .collect::<Vec<_>>(),
        }))
    }

    async fn run_race(
        &self,
        parent: &ExecutionContext,
        children: &[Arc<ExecutionContext>],
        futures: &mut FuturesUnordered<
            impl Future<Output = (usize, String, Result<(), NodeError>)>,
        >,
    ) -> Result<Value, NodeError> {
        let Some((index, node_id, result)) = futures.next().await else {
            return Ok(json!({"mode": "RACE", "branches": []}));
        };
        cancel_siblings(children, index);
        // Let losers observe cancellation so their records are final.
        while futures.next().await.is_some() {}

        match result {
            Ok(()) => {
                for (i, child) in children.iter().enumerate() {
                    if i == index {
                        parent.merge_child(child);
                    } else {
                        parent.adopt_records(child);
                    }
                }
                Ok(json!({
                    "mode": "RACE",
                    "winner": node_id,
                    "output": children[index].last_completed_output(),
                }))
            }
            Err(error) => {
                for child in children {
                    parent.adopt_records(child);
                }
                Err(NodeError {
                    kind: error.kind,
                    message: format!("race branch '{node_id}' failed: {}", error.message),
                    recoverable: error.recoverable,
                })
            }
        }
    }

    async fn run_first_success(
        &self,
        parent: &ExecutionContext,
        children: &[Arc<ExecutionContext>],
        futures: &mut FuturesUnordered<
            impl Future<Output = (usize, String, Result<(), NodeError>)>,
        >,
    ) -> Result<Value, NodeError> {
        let mut failures: Vec<(String, NodeError)> = Vec::new();
        let mut winner: Option<(usize, String)> = None;

        while let Some((index, node_id, result)) = futures.next().await {
            match result {
                Ok(()) => {
                    winner = Some((index, node_id));
                    cancel_siblings(children, index);
                    while futures.next().await.is_some() {}
                    break;
                }
                Err(error) => failures.push((node_id, error)),
            }
        }

        match winner {
            Some((index, node_id)) => {
                for (i, child) in children.iter().enumerate() {
                    if i == index {
                        parent.merge_child(child);
                    } else {
                        parent.adopt_records(child);
                    }
                }
                Ok(json!({
                    "mode": "FIRST_SUCCESS",
                    "winner": node_id,
                    "output": children[index].last_completed_output(),
                    "failures": failures
                        .iter()
                        .map(|(id, e)| json!({"node": id, "error": e.message}))
                        .collect::<Vec<_>>(),
                }))
            }
            None => {
                for child in children {
                    parent.adopt_records(child);
                }
                let detail = failures
                    .iter()
                    .map(|(id, e)| format!("{id}: {}", e.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(NodeError::new(
                    crate::error::ErrorKind::NodeFailed,
                    format!("all {} branches failed ({detail})", children.len()),
                ))
            }
        }
    }
}

fn cancel_siblings(children: &[Arc<ExecutionContext>], winner: usize) {
    for (i, child) in children.iter().enumerate() {
        if i != winner && !child.is_cancelled() {
            child.abort(NodeError::cancelled("parallel branch cancelled"));
        }
    }
}

fn report_json(report: BranchReport) -> Value {
    match report.error {
        Some(error) => json!({
            "node": report.node_id,
            "success": false,
            "error": {"kind": error.kind, "message": error.message},
        }),
        None => json!({
            "node": report.node_id,
            "success": true,
            "output": report.output,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::flows::history::{NodeExecution, NodeRunStatus};
    use crate::flows::{Flow, TriggerDescriptor};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn empty_flow() -> Arc<Flow> {
        Arc::new(Flow {
            id: "f1".to_string(),
            name: "t".to_string(),
            description: String::new(),
            enabled: true,
            nodes: vec![],
            edges: vec![],
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    fn parent() -> ExecutionContext {
        ExecutionContext::new(
            "exec-1",
            empty_flow(),
            json!({}),
            TriggerDescriptor::manual(),
            Duration::from_secs(30),
        )
    }

    fn manager() -> ParallelManager {
        ParallelManager::new(8, Arc::new(Semaphore::new(64)))
    }

    /// Branch runner that records a completed node named after the branch
    /// and sets a variable; branches listed in `fail` return an error,
    /// branches in `slow` sleep first (observing cancellation).
    fn runner(fail: Vec<String>, slow: Vec<String>) -> Box<BranchRunner> {
        Box::new(move |node_id: String, ctx: Arc<ExecutionContext>| {
            let fail = fail.clone();
            let slow = slow.clone();
            Box::pin(async move {
                if slow.contains(&node_id) {
                    ctx.sleep_checked(Duration::from_secs(5)).await?;
                }
                let index = ctx.push_record(NodeExecution::started(&node_id, "test", 1));
                if fail.contains(&node_id) {
                    let error = NodeError::external(format!("{node_id} exploded"));
                    ctx.finish_record(index, NodeRunStatus::Failed, None, Some(error.clone()));
                    return Err(error);
                }
                let output = json!({"from": node_id});
                ctx.set_node_output(&node_id, output.clone());
                ctx.set_variable(format!("var_{node_id}"), json!(true));
                ctx.finish_record(index, NodeRunStatus::Completed, Some(output), None);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn zero_branches_is_noop_success() {
        let parent = parent();
        let output = manager()
            .execute(
                &parent,
                vec![],
                ParallelMode::All {
                    continue_on_error: false,
                },
                &*runner(vec![], vec![]),
            )
            .await
            .unwrap();
        assert_eq!(output["branches"], json!([]));
    }

    #[tokio::test]
    async fn all_merges_every_branch_in_input_order() {
        let parent = parent();
        let output = manager()
            .execute(
                &parent,
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                ParallelMode::All {
                    continue_on_error: false,
                },
                &*runner(vec![], vec![]),
            )
            .await
            .unwrap();

        let branches = output["branches"].as_array().unwrap();
        assert_eq!(branches.len(), 3);
        assert_eq!(branches[0]["node"], json!("a"));
        assert_eq!(branches[1]["node"], json!("b"));
        assert_eq!(branches[2]["node"], json!("c"));

        // Overlays merged back into the parent.
        assert_eq!(parent.lookup("nodes.b.from"), Some(json!("b")));
        assert_eq!(parent.get_variable("var_c"), Some(json!(true)));
        assert_eq!(parent.records().len(), 3);
    }

    #[tokio::test]
    async fn all_failure_cancels_siblings_and_drops_overlays() {
        let parent = parent();
        let err = manager()
            .execute(
                &parent,
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                ParallelMode::All {
                    continue_on_error: false,
                },
                &*runner(vec!["b".to_string()], vec!["a".to_string(), "c".to_string()]),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("b exploded"));

        // No overlay writes from any branch became observable.
        assert!(parent.get_variable("var_a").is_none());
        assert!(parent.get_variable("var_b").is_none());
        assert!(parent.lookup("nodes.b").is_none());

        // B's failure record survives.
        let records = parent.records();
        assert!(records.iter().any(|r| {
            r.node_id == "b" && r.status == NodeRunStatus::Failed
        }));
    }

    #[tokio::test]
    async fn all_continue_on_error_keeps_successful_overlays() {
        let parent = parent();
        let output = manager()
            .execute(
                &parent,
                vec!["a".to_string(), "b".to_string()],
                ParallelMode::All {
                    continue_on_error: true,
                },
                &*runner(vec!["b".to_string()], vec![]),
            )
            .await
            .unwrap();

        let branches = output["branches"].as_array().unwrap();
        assert_eq!(branches[0]["success"], json!(true));
        assert_eq!(branches[1]["success"], json!(false));
        assert_eq!(parent.get_variable("var_a"), Some(json!(true)));
        assert!(parent.get_variable("var_b").is_none());
    }

    #[tokio::test]
    async fn race_first_finisher_wins_and_losers_cancel() {
        let parent = parent();
        let output = manager()
            .execute(
                &parent,
                vec!["slow".to_string(), "fast".to_string()],
                ParallelMode::Race,
                &*runner(vec![], vec!["slow".to_string()]),
            )
            .await
            .unwrap();

        assert_eq!(output["winner"], json!("fast"));
        assert_eq!(parent.get_variable("var_fast"), Some(json!(true)));
        // The losing branch's writes never became observable.
        assert!(parent.get_variable("var_slow").is_none());
    }

    #[tokio::test]
    async fn first_success_skips_failures() {
        let parent = parent();
        let output = manager()
            .execute(
                &parent,
                vec!["a".to_string(), "b".to_string()],
                ParallelMode::FirstSuccess,
                &*runner(vec!["a".to_string()], vec![]),
            )
            .await
            .unwrap();

        assert_eq!(output["winner"], json!("b"));
        let failures = output["failures"].as_array().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0]["node"], json!("a"));
    }

    #[tokio::test]
    async fn first_success_fails_when_all_fail() {
        let parent = parent();
        let err = manager()
            .execute(
                &parent,
                vec!["a".to_string(), "b".to_string()],
                ParallelMode::FirstSuccess,
                &*runner(vec!["a".to_string(), "b".to_string()], vec![]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NodeFailed);
        assert!(err.message.contains("all 2 branches failed"));
    }

    #[tokio::test]
    async fn mode_parses_from_config() {
        assert_eq!(
            ParallelMode::from_config(&json!({"mode": "RACE"})),
            ParallelMode::Race
        );
        assert_eq!(
            ParallelMode::from_config(&json!({"mode": "FIRST_SUCCESS"})),
            ParallelMode::FirstSuccess
        );
        assert_eq!(
            ParallelMode::from_config(&json!({})),
            ParallelMode::All {
                continue_on_error: false
            }
        );
        assert_eq!(
            ParallelMode::from_config(&json!({"mode": "ALL", "continueOnError": true})),
            ParallelMode::All {
                continue_on_error: true
            }
        );
    }

    #[tokio::test]
    async fn bounded_concurrency_queues_branches() {
        let parent = parent();
        let manager = ParallelManager::new(1, Arc::new(Semaphore::new(64)));
        // With a cap of 1 the branches serialize but all complete.
        let output = manager
            .execute(
                &parent,
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                ParallelMode::All {
                    continue_on_error: false,
                },
                &*runner(vec![], vec![]),
            )
            .await
            .unwrap();
        assert_eq!(output["branches"].as_array().unwrap().len(), 3);
    }
}
