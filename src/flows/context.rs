use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::history::{ExecutionStatus, NodeExecution};
use super::scope::ContextScope;
use super::{Edge, Flow, TriggerDescriptor};
use crate::error::NodeError;

/// Per-run mutable state: the lookup scope, visited set, node execution
/// records, cancellation and deadline.
///
/// Owned by a single traversal task. Parallel branches get a `fork()`ed
/// child whose writes land in a branch-local overlay and are merged back
/// exactly once, at the branch join, via `merge_child`. The parent does
/// not advance while branches run, so the fork-time snapshot is the live
/// parent state.
pub struct ExecutionContext {
    pub execution_id: String,
    pub flow: Arc<Flow>,
    state: Mutex<ContextState>,
    status: Mutex<ExecutionStatus>,
    abort_reason: Mutex<Option<NodeError>>,
    cancel: CancellationToken,
    deadline: tokio::time::Instant,
}

struct ContextState {
    scope: ContextScope,
    visited: HashSet<String>,
    records: Vec<NodeExecution>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: impl Into<String>,
        flow: Arc<Flow>,
        input: Value,
        trigger: TriggerDescriptor,
        timeout: Duration,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            flow,
            state: Mutex::new(ContextState {
                scope: ContextScope::new(input, trigger),
                visited: HashSet::new(),
                records: Vec::new(),
            }),
            status: Mutex::new(ExecutionStatus::Pending),
            abort_reason: Mutex::new(None),
            cancel: CancellationToken::new(),
            deadline: tokio::time::Instant::now() + timeout,
        }
    }

    /// Branch-local child: snapshot of the scope and visited set, fresh
    /// record buffer, cancellation chained to the parent, same deadline.
    pub fn fork(&self) -> Self {
        let state = self.state.lock().unwrap();
        Self {
            execution_id: self.execution_id.clone(),
            flow: self.flow.clone(),
            state: Mutex::new(ContextState {
                scope: state.scope.clone(),
                visited: state.visited.clone(),
                records: Vec::new(),
            }),
            status: Mutex::new(ExecutionStatus::Running),
            abort_reason: Mutex::new(None),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Merge a finished child back: variables last-writer-wins, node
    /// outputs by node-id, records appended in child order. Called once
    /// per branch, at the join, under the parent's critical section.
    pub fn merge_child(&self, child: &Self) {
        let child_state = child.state.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        for (name, value) in &child_state.scope.variables {
            state.scope.variables.insert(name.clone(), value.clone());
        }
        for (node_id, output) in &child_state.scope.node_outputs {
            state.scope.node_outputs.insert(node_id.clone(), output.clone());
        }
        state.visited.extend(child_state.visited.iter().cloned());
        state.records.extend(child_state.records.iter().cloned());
    }

    /// Take a finished child's records without merging its scope writes.
    /// Used when a branch's results are discarded (losing RACE branches,
    /// failed ALL aggregation) but its history must be preserved.
    pub fn adopt_records(&self, child: &Self) {
        let child_state = child.state.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        state.records.extend(child_state.records.iter().cloned());
    }

    /// Output of the most recently completed node in this context's
    /// record list. Used as a branch's aggregate result.
    pub fn last_completed_output(&self) -> Value {
        let state = self.state.lock().unwrap();
        state
            .records
            .iter()
            .rev()
            .find(|r| r.status == super::history::NodeRunStatus::Completed)
            .and_then(|r| r.output.clone())
            .unwrap_or(Value::Null)
    }

    // ── Status ─────────────────────────────────────────────────────────

    /// Transition pending → running and start the deadline clock.
    pub fn start(&self) -> Result<(), NodeError> {
        let mut status = self.status.lock().unwrap();
        if *status != ExecutionStatus::Pending {
            return Err(NodeError::validation(format!(
                "execution is {}, expected pending",
                status.as_str()
            )));
        }
        *status = ExecutionStatus::Running;
        Ok(())
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.lock().unwrap()
    }

    /// Move to a terminal status. Invalid transitions are ignored so a
    /// cancel racing a natural completion cannot rewrite history.
    pub fn finish(&self, next: ExecutionStatus) -> bool {
        let mut status = self.status.lock().unwrap();
        if status.can_transition_to(next) {
            *status = next;
            true
        } else {
            false
        }
    }

    // ── Scope ──────────────────────────────────────────────────────────

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        let mut state = self.state.lock().unwrap();
        state.scope.variables.insert(name.into(), value);
    }

    pub fn set_node_output(&self, node_id: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        state.scope.node_outputs.insert(node_id.to_string(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.state.lock().unwrap().scope.variables.get(name).cloned()
    }

    pub fn lookup(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().scope.lookup(path)
    }

    /// Run a closure against the current scope snapshot (for resolving
    /// node config without cloning the whole scope).
    pub fn with_scope<T>(&self, f: impl FnOnce(&ContextScope) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(&state.scope)
    }

    pub fn collect_final_output(&self) -> Value {
        let terminal_ids: Vec<String> = self
            .flow
            .terminal_nodes()
            .iter()
            .map(|n| n.id.clone())
            .collect();
        let state = self.state.lock().unwrap();
        state.scope.final_output(&terminal_ids)
    }

    // ── Traversal bookkeeping ──────────────────────────────────────────

    /// Mark a node visited in the current frame. Returns false when the
    /// node was already visited (re-entry outside loop semantics).
    pub fn mark_executed(&self, node_id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        state.visited.insert(node_id.to_string())
    }

    /// Clear the visited marks for a loop body so the next iteration may
    /// re-enter it.
    pub fn clear_visited(&self, node_ids: &[String]) {
        let mut state = self.state.lock().unwrap();
        for id in node_ids {
            state.visited.remove(id);
        }
    }

    /// Outgoing targets of a node. Explicit next-branch labels filter the
    /// edges; otherwise every outgoing edge is taken, in declared order.
    pub fn next_edges(&self, node_id: &str, next_branches: Option<&[String]>) -> Vec<Edge> {
        self.flow
            .outgoing(node_id)
            .into_iter()
            .filter(|edge| match next_branches {
                Some(labels) => edge
                    .label
                    .as_ref()
                    .is_some_and(|l| labels.iter().any(|b| b == l)),
                None => true,
            })
            .cloned()
            .collect()
    }

    // ── Records ────────────────────────────────────────────────────────

    /// Append a node execution record, returning its index for later
    /// completion. There is no API to rewrite earlier history.
    pub fn push_record(&self, record: NodeExecution) -> usize {
        let mut state = self.state.lock().unwrap();
        state.records.push(record);
        state.records.len() - 1
    }

    pub fn finish_record(
        &self,
        index: usize,
        status: super::history::NodeRunStatus,
        output: Option<Value>,
        error: Option<NodeError>,
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.get_mut(index) {
            record.finish(status, output, error);
        }
    }

    pub fn records(&self) -> Vec<NodeExecution> {
        self.state.lock().unwrap().records.clone()
    }

    // ── Cancellation & deadline ────────────────────────────────────────

    pub fn abort(&self, reason: NodeError) {
        {
            let mut abort = self.abort_reason.lock().unwrap();
            if abort.is_none() {
                *abort = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    pub fn abort_reason(&self) -> Option<NodeError> {
        self.abort_reason.lock().unwrap().clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn deadline(&self) -> tokio::time::Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline
            .saturating_duration_since(tokio::time::Instant::now())
    }

    pub fn check_deadline(&self) -> Result<(), NodeError> {
        if tokio::time::Instant::now() >= self.deadline {
            Err(NodeError::timeout("execution deadline exceeded"))
        } else {
            Ok(())
        }
    }

    /// Cooperative checkpoint: observe cancellation first, then deadline.
    pub fn checkpoint(&self) -> Result<(), NodeError> {
        if self.cancel.is_cancelled() {
            return Err(self
                .abort_reason()
                .unwrap_or_else(|| NodeError::cancelled("execution cancelled")));
        }
        self.check_deadline()
    }

    /// Sleep that yields the worker and wakes early on cancellation or
    /// the execution deadline.
    pub async fn sleep_checked(&self, duration: Duration) -> Result<(), NodeError> {
        let wake = tokio::time::Instant::now() + duration;
        let until = wake.min(self.deadline);
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep_until(until) => {}
        }
        self.checkpoint()?;
        // Deadline is further out than the requested sleep: normal wake.
        Ok(())
    }
}
