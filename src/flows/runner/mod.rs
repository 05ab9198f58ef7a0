
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::{RwLock, Semaphore, broadcast};
use tracing::Instrument;

use super::context::ExecutionContext;
use super::events::{RunEvent, RunEventType};
use super::history::{Execution, ExecutionStatus, NodeExecution, NodeRunStatus};
use super::parallel::{ParallelManager, ParallelMode};
use super::registry::NodeRegistry;
use super::repository::ExecutionRepository;
use super::resolver;
use super::wait::WaitCoordinator;
use super::{Flow, Node, TriggerDescriptor};
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorKind, NodeError};
use crate::nodes::{NodeCtx, NodeExecutor, NodeResult};
use crate::resilience::ErrorStrategy;
use crate::resilience::circuit::{CircuitBreaker, CircuitConfig};
use crate::services::Services;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Trigger kinds recognized when locating entry nodes.
const TRIGGER_KINDS: &[&str] = &["trigger", "manual", "schedule", "webhook", "message"];

/// Options for one `execute(flow, options)` call.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub input: Value,
    pub trigger: TriggerDescriptor,
    pub owner: String,
    pub timeout: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            input: json!({}),
            trigger: TriggerDescriptor::manual(),
            owner: "system".to_string(),
            timeout: None,
        }
    }
}

/// How far a traversal should keep walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Continue,
    /// A node returned `continue=false`; stop this traversal.
    Stop,
}

/// Outcome of running one node through its error strategy.
struct StrategyOutcome {
    result: NodeResult,
    redirect: Option<String>,
}

struct ActiveRun {
    base: Execution,
    ctx: Arc<ExecutionContext>,
}

/// Evaluates flow graphs: locates entry nodes, executes each node through
/// its registered executor, walks edges, fans out parallel branches,
/// suspends on waits, and funnels failures through per-node strategies
/// and the process-wide circuit breaker.
pub struct FlowEngine {
    config: EngineConfig,
    registry: Arc<NodeRegistry>,
    services: Services,
    repository: Arc<dyn ExecutionRepository>,
    circuit: Arc<CircuitBreaker>,
    wait: Arc<WaitCoordinator>,
    global_branch_cap: Arc<Semaphore>,
    events_tx: broadcast::Sender<RunEvent>,
    active: RwLock<HashMap<String, ActiveRun>>,
}

impl FlowEngine {
    pub fn new(
        config: EngineConfig,
        registry: Arc<NodeRegistry>,
        services: Services,
        repository: Arc<dyn ExecutionRepository>,
    ) -> Arc<Self> {
        let circuit = Arc::new(CircuitBreaker::new(CircuitConfig {
            failure_threshold: config.circuit_failure_threshold,
            window: config.circuit_window,
            cooldown: config.circuit_cooldown,
            half_open_probes: 1,
        }));
        let wait = Arc::new(WaitCoordinator::new(
            services.messaging.clone(),
            config.wait_poll_interval,
        ));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let global_branch_cap = Arc::new(Semaphore::new(config.global_branch_cap));

        Arc::new(Self {
            config,
            registry,
            services,
            repository,
            circuit,
            wait,
            global_branch_cap,
            events_tx,
            active: RwLock::new(HashMap::new()),
        })
    }

    /// Live progress stream. Best-effort: lagging receivers drop events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        self.events_tx.subscribe()
    }

    /// The process-wide breaker (shared across runs).
    pub fn circuit(&self) -> Arc<CircuitBreaker> {
        self.circuit.clone()
    }

    /// Entry point for inbound messages from the messaging collaborator's
    /// `subscribe-inbound` handler.
    pub async fn offer_inbound(
        &self,
        message: &crate::services::messaging::InboundMessage,
    ) -> bool {
        self.wait.deliver_inbound(message).await
    }

    // ── Administrative surface ─────────────────────────────────────────

    pub async fn cancel(&self, execution_id: &str) -> bool {
        let active = self.active.read().await;
        match active.get(execution_id) {
            Some(run) => {
                run.ctx
                    .abort(NodeError::cancelled("execution cancelled by operator"));
                true
            }
            None => false,
        }
    }

    pub async fn list_active(&self) -> Vec<Execution> {
        let active = self.active.read().await;
        active.values().map(|run| snapshot(run)).collect()
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<Execution> {
        {
            let active = self.active.read().await;
            if let Some(run) = active.get(execution_id) {
                return Some(snapshot(run));
            }
        }
        self.repository.get(execution_id).await
    }

    /// Validation report for every node in a flow: unresolvable types and
    /// per-executor config problems.
    pub fn validate_flow(&self, flow: &Flow) -> Vec<(String, String)> {
        let mut problems = Vec::new();
        for node in &flow.nodes {
            match self.registry.resolve(node) {
                None => problems.push((
                    node.id.clone(),
                    format!("no executor registered for type '{}'", node.node_type),
                )),
                Some(executor) => {
                    for problem in executor.validate(node) {
                        problems.push((node.id.clone(), problem));
                    }
                }
            }
        }
        problems
    }

    // ── Execution ──────────────────────────────────────────────────────

    pub async fn execute(
        self: &Arc<Self>,
        flow: Flow,
        options: ExecuteOptions,
    ) -> Result<Execution, EngineError> {
        if flow.nodes.is_empty() {
            return Err(EngineError::EmptyFlow(flow.id.clone()));
        }

        let timeout = options.timeout.unwrap_or(self.config.execution_timeout);
        let mut base = Execution::new(
            flow.id.clone(),
            options.owner,
            options.trigger.clone(),
            options.input.clone(),
        );
        base.status = ExecutionStatus::Running;
        base.started_at = Some(Utc::now());

        let flow = Arc::new(flow);
        let ctx = Arc::new(ExecutionContext::new(
            base.id.clone(),
            flow.clone(),
            options.input,
            options.trigger,
            timeout,
        ));
        ctx.start().map_err(EngineError::Node)?;

        self.repository.insert(&base).await?;
        self.active.write().await.insert(
            base.id.clone(),
            ActiveRun {
                base: base.clone(),
                ctx: ctx.clone(),
            },
        );
        self.emit(&ctx, None, RunEventType::ExecutionStarted, json!({}));

        let span = tracing::info_span!("flow_run", flow = %flow.name, run = %base.short_id());
        tracing::info!(
            parent: &span,
            nodes = flow.nodes.len(),
            edges = flow.edges.len(),
            "▶ Started"
        );

        let start = std::time::Instant::now();
        let result = self
            .clone()
            .run_traversals(ctx.clone(), flow.clone())
            .instrument(span.clone())
            .await;
        let elapsed = start.elapsed();

        // Terminal bookkeeping: status, timestamps, records, output.
        let mut finished = base;
        finished.finished_at = Some(Utc::now());
        finished.node_executions = ctx.records();

        let event = match &result {
            Ok(()) => {
                ctx.finish(ExecutionStatus::Completed);
                finished.status = ExecutionStatus::Completed;
                finished.output = ctx.collect_final_output();
                tracing::info!(
                    parent: &span,
                    elapsed = format_args!("{:.1}s", elapsed.as_secs_f64()),
                    "✓ Completed"
                );
                RunEventType::ExecutionCompleted
            }
            Err(error) if error.kind == ErrorKind::Cancelled => {
                ctx.finish(ExecutionStatus::Cancelled);
                finished.status = ExecutionStatus::Cancelled;
                finished.error = Some(error.clone());
                tracing::warn!(parent: &span, "◼ Cancelled");
                RunEventType::ExecutionCancelled
            }
            Err(error) => {
                ctx.finish(ExecutionStatus::Failed);
                finished.status = ExecutionStatus::Failed;
                finished.error = Some(error.clone());
                tracing::error!(
                    parent: &span,
                    elapsed = format_args!("{:.1}s", elapsed.as_secs_f64()),
                    error = %error,
                    "✗ Failed"
                );
                RunEventType::ExecutionFailed
            }
        };

        let persisted = self.repository.update(&finished).await;
        self.emit(
            &ctx,
            None,
            event,
            json!({
                "status": finished.status.as_str(),
                "error": finished.error.as_ref().map(|e| json!({
                    "kind": e.kind,
                    "message": e.message,
                })),
            }),
        );

        self.wait.discard_execution(&finished.id).await;
        self.active.write().await.remove(&finished.id);
        persisted?;

        Ok(finished)
    }

    async fn run_traversals(
        self: Arc<Self>,
        ctx: Arc<ExecutionContext>,
        flow: Arc<Flow>,
    ) -> Result<(), NodeError> {
        for start in find_start_nodes(&flow) {
            match self.clone().traverse(ctx.clone(), start).await? {
                Signal::Continue => {}
                Signal::Stop => break,
            }
        }
        Ok(())
    }

    /// Depth-first, left-to-right walk from one node.
    fn traverse(
        self: Arc<Self>,
        ctx: Arc<ExecutionContext>,
        node_id: String,
    ) -> BoxFuture<'static, Result<Signal, NodeError>> {
        Box::pin(async move {
            // Visited nodes are not re-entered outside loop frames.
            if !ctx.mark_executed(&node_id) {
                return Ok(Signal::Continue);
            }
            ctx.checkpoint()?;

            let Some(node) = ctx.flow.get_node(&node_id).cloned() else {
                tracing::warn!(node_id = %node_id, "Edge points at a missing node, skipping");
                return Ok(Signal::Continue);
            };

            let Some(executor) = self.registry.resolve(&node) else {
                return self.skip_unknown_node(ctx, &node).await;
            };

            if executor.is_loop() {
                return self.run_loop_node(ctx, &node, executor).await;
            }
            if executor.is_parallel() {
                return self.run_parallel_node(ctx, &node, executor).await;
            }

            let outcome = self.run_with_strategy(&ctx, &node, executor.as_ref()).await?;

            if let Some(updates) = &outcome.result.variable_updates {
                for (name, value) in updates {
                    ctx.set_variable(name.clone(), value.clone());
                }
            }
            if outcome.result.success {
                ctx.set_node_output(&node.id, outcome.result.output.clone());
            }

            if let Some(target) = outcome.redirect {
                if ctx.flow.get_node(&target).is_none() {
                    return Err(NodeError::validation(format!(
                        "redirect target '{target}' not found in flow"
                    )));
                }
                return self.traverse(ctx, target).await;
            }

            if !outcome.result.proceed {
                return Ok(Signal::Stop);
            }

            let next = ctx.next_edges(&node.id, outcome.result.next_branches.as_deref());
            self.walk_edges(ctx, next.iter().map(|e| e.target.clone()).collect())
                .await
        })
    }

    async fn walk_edges(
        self: Arc<Self>,
        ctx: Arc<ExecutionContext>,
        targets: Vec<String>,
    ) -> Result<Signal, NodeError> {
        for target in targets {
            match self.clone().traverse(ctx.clone(), target).await? {
                Signal::Continue => {}
                Signal::Stop => return Ok(Signal::Stop),
            }
        }
        Ok(Signal::Continue)
    }

    /// Unknown node type: success-skipped record, traversal continues.
    async fn skip_unknown_node(
        self: Arc<Self>,
        ctx: Arc<ExecutionContext>,
        node: &Node,
    ) -> Result<Signal, NodeError> {
        let reason = format!("no executor registered for type '{}'", node.node_type);
        tracing::warn!(node = %node.display(), reason = %reason, "Skipping node");

        let result = NodeResult::skipped(&reason);
        let index = ctx.push_record(NodeExecution::started(&node.id, &node.node_type, 1));
        ctx.finish_record(
            index,
            NodeRunStatus::Skipped,
            Some(result.output.clone()),
            None,
        );
        ctx.set_node_output(&node.id, result.output.clone());
        self.emit(
            &ctx,
            Some(&node.id),
            RunEventType::NodeCompleted,
            json!({"status": "skipped", "reason": reason}),
        );

        let next = ctx.next_edges(&node.id, None);
        self.walk_edges(ctx, next.iter().map(|e| e.target.clone()).collect())
            .await
    }

    /// Run one node: circuit check, validate, execute, record, retrying
    /// or recovering per the node's declared strategy.
    async fn run_with_strategy(
        &self,
        ctx: &Arc<ExecutionContext>,
        node: &Node,
        executor: &dyn NodeExecutor,
    ) -> Result<StrategyOutcome, NodeError> {
        let strategy = ErrorStrategy::from_config(&node.config);
        let circuit_key = node.config["circuitKey"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| format!("node:{}", node.node_type));

        let mut attempt: u32 = 1;
        loop {
            ctx.checkpoint()?;

            let error = match self
                .attempt_node(ctx, node, executor, &circuit_key, attempt)
                .await
            {
                Ok(result) => return Ok(StrategyOutcome {
                    result,
                    redirect: None,
                }),
                Err(error) => error,
            };

            // Cancellation and timeout bypass strategies entirely.
            if error.bypasses_strategies() {
                return Err(error);
            }

            match &strategy {
                ErrorStrategy::Retry(policy)
                    if error.recoverable && attempt <= policy.max_retries =>
                {
                    let delay = policy.delay(attempt);
                    tracing::info!(
                        node = %node.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "↻ Retrying after backoff"
                    );
                    ctx.sleep_checked(delay).await?;
                    attempt += 1;
                }
                ErrorStrategy::Skip => {
                    tracing::info!(node = %node.display(), error = %error, "Skipping failed node");
                    return Ok(StrategyOutcome {
                        result: NodeResult::skipped(error.message),
                        redirect: None,
                    });
                }
                ErrorStrategy::Redirect { target } => {
                    tracing::info!(node = %node.display(), target = %target, "Redirecting after failure");
                    return Ok(StrategyOutcome {
                        result: NodeResult {
                            success: false,
                            output: Value::Null,
                            error: Some(error),
                            proceed: true,
                            next_branches: None,
                            variable_updates: None,
                        },
                        redirect: Some(target.clone()),
                    });
                }
                ErrorStrategy::FallbackOutput { output } => {
                    tracing::info!(node = %node.display(), "Using fallback output after failure");
                    return Ok(StrategyOutcome {
                        result: NodeResult::ok(output.clone()),
                        redirect: None,
                    });
                }
                // Fail, or a retry that ran out of attempts / hit an
                // unrecoverable error: take the `failed` edge if one
                // exists, otherwise terminate.
                _ => {
                    let failed_edges = ctx.next_edges(&node.id, Some(&["failed".to_string()]));
                    if !failed_edges.is_empty() {
                        return Ok(StrategyOutcome {
                            result: NodeResult {
                                success: false,
                                output: Value::Null,
                                error: Some(error),
                                proceed: true,
                                next_branches: Some(vec!["failed".to_string()]),
                                variable_updates: None,
                            },
                            redirect: None,
                        });
                    }
                    return Err(NodeError::node_failed(&node.id, &error));
                }
            }
        }
    }

    /// One attempt: circuit gate, validation, resolution, execution, and
    /// the per-attempt record.
    async fn attempt_node(
        &self,
        ctx: &Arc<ExecutionContext>,
        node: &Node,
        executor: &dyn NodeExecutor,
        circuit_key: &str,
        attempt: u32,
    ) -> Result<NodeResult, NodeError> {
        if !self.circuit.can_execute(circuit_key) {
            let error = NodeError::circuit_open(format!(
                "circuit breaker for '{circuit_key}' is open"
            ));
            let index = ctx.push_record(NodeExecution::started(&node.id, &node.node_type, attempt));
            ctx.finish_record(index, NodeRunStatus::Failed, None, Some(error.clone()));
            self.emit_node_failed(ctx, node, attempt, &error);
            return Err(error);
        }

        let problems = executor.validate(node);
        if !problems.is_empty() {
            let error = NodeError::validation(problems.join("; "));
            let index = ctx.push_record(NodeExecution::started(&node.id, &node.node_type, attempt));
            ctx.finish_record(index, NodeRunStatus::Failed, None, Some(error.clone()));
            self.emit_node_failed(ctx, node, attempt, &error);
            return Err(error);
        }

        let data = ctx.with_scope(|scope| resolver::resolve_value(&node.config, scope));

        let index = ctx.push_record(NodeExecution::started(&node.id, &node.node_type, attempt));
        self.emit(
            ctx,
            Some(&node.id),
            RunEventType::NodeStarted,
            json!({"attempt": attempt, "nodeType": node.node_type}),
        );
        tracing::debug!(node = %node.display(), attempt, "Executing node");

        let result = executor
            .execute(NodeCtx {
                node,
                data,
                exec: ctx,
                services: &self.services,
                wait: &self.wait,
            })
            .await;

        if result.success {
            ctx.finish_record(
                index,
                NodeRunStatus::Completed,
                Some(result.output.clone()),
                None,
            );
            self.circuit.record_success(circuit_key);
            self.emit(
                ctx,
                Some(&node.id),
                RunEventType::NodeCompleted,
                json!({
                    "status": "completed",
                    "attempt": attempt,
                    "preview": super::history::truncate(&result.output.to_string(), 200),
                }),
            );
            return Ok(result);
        }

        let error = result
            .error
            .clone()
            .unwrap_or_else(|| NodeError::new(ErrorKind::NodeFailed, "node reported failure"));

        let status = if error.kind == ErrorKind::Cancelled {
            NodeRunStatus::Cancelled
        } else {
            NodeRunStatus::Failed
        };
        ctx.finish_record(index, status, None, Some(error.clone()));

        // Cancellation is not the node type's fault; everything else
        // counts against its circuit.
        if !error.bypasses_strategies() {
            self.circuit.record_failure(circuit_key);
        }
        self.emit_node_failed(ctx, node, attempt, &error);
        Err(error)
    }

    /// Loop node: re-run the `body` subtree once per item in a fresh
    /// frame, then take the `done` (and unlabeled) edges.
    async fn run_loop_node(
        self: Arc<Self>,
        ctx: Arc<ExecutionContext>,
        node: &Node,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<Signal, NodeError> {
        use crate::nodes::loop_node::{index_var, item_var, parse_items};

        let outcome = self.run_with_strategy(&ctx, node, executor.as_ref()).await?;
        if !outcome.result.success {
            // Recovered failure (skip/fallback/failed-edge): no iterations.
            let next = ctx.next_edges(&node.id, outcome.result.next_branches.as_deref());
            return self
                .walk_edges(ctx, next.iter().map(|e| e.target.clone()).collect())
                .await;
        }

        let data = ctx.with_scope(|scope| resolver::resolve_value(&node.config, scope));
        let items = match parse_items(&data) {
            Ok(items) => items,
            Err(error) => return Err(NodeError::node_failed(&node.id, &error)),
        };
        let item_name = item_var(&data);
        let index_name = index_var(&data);

        let body_targets: Vec<String> = ctx
            .flow
            .outgoing(&node.id)
            .iter()
            .filter(|e| e.label.as_deref() == Some("body"))
            .map(|e| e.target.clone())
            .collect();

        let total = items.len();
        let mut completed = 0usize;
        let mut broke = false;

        if !body_targets.is_empty() {
            for (i, item) in items.into_iter().enumerate() {
                ctx.checkpoint()?;

                let child = Arc::new(ctx.fork());
                child.set_variable(item_name.clone(), item);
                child.set_variable(index_name.clone(), json!(i));

                let mut signal = Signal::Continue;
                for target in &body_targets {
                    signal = self.clone().traverse(child.clone(), target.clone()).await?;
                    if signal == Signal::Stop {
                        break;
                    }
                }

                let body_ids: Vec<String> = child
                    .records()
                    .iter()
                    .map(|r| r.node_id.clone())
                    .collect();
                ctx.merge_child(&child);
                completed += 1;

                if signal == Signal::Stop {
                    broke = true;
                    break;
                }
                if i + 1 < total {
                    ctx.clear_visited(&body_ids);
                }
            }
        }

        let output = json!({
            "iterations": completed,
            "total": total,
            "broke": broke,
        });
        ctx.set_node_output(&node.id, output);
        tracing::debug!(node = %node.display(), iterations = completed, broke, "Loop finished");

        // After the loop: `done` edges plus unlabeled edges.
        let targets: Vec<String> = ctx
            .flow
            .outgoing(&node.id)
            .iter()
            .filter(|e| e.label.is_none() || e.label.as_deref() == Some("done"))
            .map(|e| e.target.clone())
            .collect();
        self.walk_edges(ctx, targets).await
    }

    /// Parallel node: hand the outgoing branches to the parallel manager
    /// with child contexts; the aggregate becomes the node's output.
    async fn run_parallel_node(
        self: Arc<Self>,
        ctx: Arc<ExecutionContext>,
        node: &Node,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<Signal, NodeError> {
        let problems = executor.validate(node);
        if !problems.is_empty() {
            return Err(NodeError::node_failed(
                &node.id,
                &NodeError::validation(problems.join("; ")),
            ));
        }

        let data = ctx.with_scope(|scope| resolver::resolve_value(&node.config, scope));
        let mode = ParallelMode::from_config(&data);
        let branch_targets: Vec<String> = ctx
            .flow
            .outgoing(&node.id)
            .iter()
            .map(|e| e.target.clone())
            .collect();

        // A single branch does not need fan-out machinery.
        if branch_targets.len() <= 1 {
            let index = ctx.push_record(NodeExecution::started(&node.id, &node.node_type, 1));
            let output = json!({"mode": mode.as_str(), "branches": branch_targets});
            ctx.finish_record(index, NodeRunStatus::Completed, Some(output.clone()), None);
            ctx.set_node_output(&node.id, output);
            return self.walk_edges(ctx, branch_targets).await;
        }

        let index = ctx.push_record(NodeExecution::started(&node.id, &node.node_type, 1));
        self.emit(
            &ctx,
            Some(&node.id),
            RunEventType::NodeStarted,
            json!({"mode": mode.as_str(), "branches": branch_targets.len()}),
        );
        tracing::info!(
            node = %node.display(),
            mode = mode.as_str(),
            branches = branch_targets.len(),
            "⇉ Fanning out"
        );

        let manager = ParallelManager::new(
            self.config.max_parallel_branches,
            self.global_branch_cap.clone(),
        );
        let engine = self.clone();
        let run = move |start: String, child: Arc<ExecutionContext>| -> BoxFuture<'static, Result<(), NodeError>> {
            let engine = engine.clone();
            Box::pin(async move {
                engine.traverse(child, start).await.map(|_| ())
            })
        };

        match manager.execute(&ctx, branch_targets, mode, &run).await {
            Ok(aggregate) => {
                ctx.finish_record(
                    index,
                    NodeRunStatus::Completed,
                    Some(aggregate.clone()),
                    None,
                );
                ctx.set_node_output(&node.id, aggregate);
                self.emit(
                    &ctx,
                    Some(&node.id),
                    RunEventType::NodeCompleted,
                    json!({"status": "completed", "mode": mode.as_str()}),
                );
                // Branches ran to their terminals; this traversal is done.
                Ok(Signal::Continue)
            }
            Err(error) => {
                let status = if error.kind == ErrorKind::Cancelled {
                    NodeRunStatus::Cancelled
                } else {
                    NodeRunStatus::Failed
                };
                ctx.finish_record(index, status, None, Some(error.clone()));
                self.emit_node_failed(&ctx, node, 1, &error);
                if error.bypasses_strategies() {
                    return Err(error);
                }
                Err(NodeError::node_failed(&node.id, &error))
            }
        }
    }

    // ── Events ─────────────────────────────────────────────────────────

    fn emit(
        &self,
        ctx: &ExecutionContext,
        node_id: Option<&str>,
        event_type: RunEventType,
        payload: Value,
    ) {
        let _ = self.events_tx.send(RunEvent {
            execution_id: ctx.execution_id.clone(),
            flow_id: ctx.flow.id.clone(),
            timestamp: Utc::now(),
            node_id: node_id.map(String::from),
            event_type,
            payload,
        });
    }

    fn emit_node_failed(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        attempt: u32,
        error: &NodeError,
    ) {
        self.emit(
            ctx,
            Some(&node.id),
            RunEventType::NodeFailed,
            json!({
                "attempt": attempt,
                "error": {"kind": error.kind, "message": error.message},
            }),
        );
    }
}

fn snapshot(run: &ActiveRun) -> Execution {
    let mut execution = run.base.clone();
    execution.status = run.ctx.status();
    execution.node_executions = run.ctx.records();
    execution
}

/// Entry nodes: trigger-kind nodes, else nodes with no incoming edges,
/// else the first node.
fn find_start_nodes(flow: &Flow) -> Vec<String> {
    let triggers: Vec<String> = flow
        .nodes
        .iter()
        .filter(|n| {
            TRIGGER_KINDS.contains(&n.node_type.as_str())
                || n.subtype
                    .as_deref()
                    .is_some_and(|s| TRIGGER_KINDS.contains(&s))
        })
        .map(|n| n.id.clone())
        .collect();
    if !triggers.is_empty() {
        return triggers;
    }

    let roots: Vec<String> = flow
        .nodes
        .iter()
        .filter(|n| !flow.has_incoming(&n.id))
        .map(|n| n.id.clone())
        .collect();
    if !roots.is_empty() {
        return roots;
    }

    flow.nodes.first().map(|n| vec![n.id.clone()]).unwrap_or_default()
}
