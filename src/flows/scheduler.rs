use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use croner::Cron;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::runner::{ExecuteOptions, FlowEngine};
use super::{Flow, TriggerDescriptor};

/// Where the scheduler finds flows. The hosting process decides storage;
/// the scheduler only needs lookups.
#[async_trait]
pub trait FlowProvider: Send + Sync {
    async fn list_flows(&self) -> Vec<Flow>;
    async fn get_flow(&self, id: &str) -> Option<Flow>;
}

/// Owns one background task per enabled flow with a `schedule` trigger,
/// firing `execute()` on the trigger's cron expression. Manual, webhook
/// and message triggers do not auto-start.
pub struct FlowScheduler {
    provider: Arc<dyn FlowProvider>,
    engine: Arc<FlowEngine>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl FlowScheduler {
    pub fn new(provider: Arc<dyn FlowProvider>, engine: Arc<FlowEngine>) -> Self {
        Self {
            provider,
            engine,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start_all(&self) {
        let flows = self.provider.list_flows().await;
        for flow in flows {
            if flow.enabled {
                if let Err(e) = self.start_flow(&flow.id).await {
                    tracing::error!(flow = %flow.name, error = %e, "Failed to start flow trigger");
                }
            }
        }
    }

    pub async fn start_flow(&self, flow_id: &str) -> Result<()> {
        let flow = self
            .provider
            .get_flow(flow_id)
            .await
            .context("flow not found")?;

        if !flow.enabled {
            tracing::debug!(flow = %flow.name, "Flow is disabled, not starting trigger");
            return Ok(());
        }

        let Some(trigger_node) = flow.nodes.iter().find(|n| {
            n.node_type == "trigger" || n.node_type == "schedule"
        }) else {
            tracing::debug!(flow = %flow.name, "Flow has no trigger node, skipping");
            return Ok(());
        };

        let kind = trigger_node
            .subtype
            .as_deref()
            .unwrap_or(trigger_node.node_type.as_str());

        match kind {
            "schedule" | "cron" => {
                let schedule = trigger_node.config["schedule"]
                    .as_str()
                    .context("schedule trigger missing 'schedule'")?
                    .to_string();

                let flow_id = flow.id.clone();
                let flow_name = flow.name.clone();
                let provider = self.provider.clone();
                let engine = self.engine.clone();

                tracing::info!(flow = %flow.name, schedule = %schedule, "Started schedule trigger");

                let handle = tokio::spawn(async move {
                    cron_loop(&flow_id, &flow_name, &schedule, provider, engine).await;
                });
                self.handles.lock().await.insert(flow.id.clone(), handle);
            }
            "manual" | "webhook" | "message" | "trigger" => {
                tracing::debug!(
                    flow = %flow.name,
                    kind = %kind,
                    "Trigger kind does not auto-start"
                );
            }
            other => {
                tracing::warn!(flow = %flow.name, kind = %other, "Unknown trigger kind, skipping");
            }
        }

        Ok(())
    }

    pub async fn stop_flow(&self, flow_id: &str) {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.remove(flow_id) {
            handle.abort();
            tracing::info!(flow_id = %flow_id, "Stopped flow trigger");
        }
    }

    pub async fn restart_flow(&self, flow_id: &str) -> Result<()> {
        self.stop_flow(flow_id).await;
        self.start_flow(flow_id).await
    }

    /// Flow IDs that currently have active scheduler tasks.
    pub async fn active_flow_ids(&self) -> Vec<String> {
        let handles = self.handles.lock().await;
        handles.keys().cloned().collect()
    }
}

async fn cron_loop(
    flow_id: &str,
    flow_name: &str,
    schedule: &str,
    provider: Arc<dyn FlowProvider>,
    engine: Arc<FlowEngine>,
) {
    let cron = match Cron::new(schedule).parse() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(flow = %flow_name, error = %e, "Invalid cron expression '{schedule}'");
            return;
        }
    };

    tracing::info!(flow = %flow_name, schedule = %schedule, "Cron loop started");

    loop {
        let now = Utc::now();
        let next = match cron.find_next_occurrence(&now, false) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(flow = %flow_name, error = %e, "Failed to compute next cron occurrence");
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                continue;
            }
        };

        let duration = (next - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));
        tracing::debug!(
            flow = %flow_name,
            next = %next.format("%Y-%m-%d %H:%M:%S UTC"),
            "Sleeping until next cron fire"
        );
        tokio::time::sleep(duration).await;

        // Guard against premature wake from sleep imprecision.
        let now_after = Utc::now();
        if now_after < next {
            let remaining = (next - now_after).to_std().unwrap_or_default();
            tokio::time::sleep(remaining).await;
        }

        // Re-fetch in case the flow was edited or disabled.
        let flow = match provider.get_flow(flow_id).await {
            Some(f) if f.enabled => f,
            Some(_) => {
                tracing::info!(flow = %flow_name, "Flow disabled, stopping cron loop");
                return;
            }
            None => {
                tracing::info!(flow = %flow_name, "Flow deleted, stopping cron loop");
                return;
            }
        };

        let options = ExecuteOptions {
            trigger: TriggerDescriptor {
                kind: "schedule".to_string(),
                source: None,
                payload: json!({"schedule": schedule}),
            },
            ..ExecuteOptions::default()
        };
        match engine.execute(flow, options).await {
            Ok(execution) => {
                tracing::info!(
                    flow = %flow_name,
                    execution = %execution.short_id(),
                    status = execution.status.as_str(),
                    "Scheduled execution finished"
                );
            }
            Err(e) => {
                tracing::error!(flow = %flow_name, error = %e, "Scheduled execution failed to start");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::flows::registry::NodeRegistry;
    use crate::flows::repository::MemoryExecutionRepository;
    use crate::flows::{Edge, Node, Position};
    use crate::services::Services;
    use serde_json::json;

    struct StaticProvider {
        flows: Vec<Flow>,
    }

    #[async_trait]
    impl FlowProvider for StaticProvider {
        async fn list_flows(&self) -> Vec<Flow> {
            self.flows.clone()
        }

        async fn get_flow(&self, id: &str) -> Option<Flow> {
            self.flows.iter().find(|f| f.id == id).cloned()
        }
    }

    fn scheduled_flow(id: &str, enabled: bool, schedule: &str) -> Flow {
        Flow {
            id: id.to_string(),
            name: format!("flow {id}"),
            description: String::new(),
            enabled,
            nodes: vec![Node {
                id: "t1".to_string(),
                node_type: "trigger".to_string(),
                subtype: Some("schedule".to_string()),
                config: json!({"schedule": schedule}),
                label: String::new(),
                position: Position::default(),
            }],
            edges: Vec::<Edge>::new(),
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn engine() -> Arc<FlowEngine> {
        FlowEngine::new(
            EngineConfig::default(),
            Arc::new(NodeRegistry::with_builtin_nodes()),
            Services::stubbed(),
            Arc::new(MemoryExecutionRepository::new()),
        )
    }

    #[tokio::test]
    async fn start_all_spawns_tasks_for_enabled_schedule_flows() {
        let provider = Arc::new(StaticProvider {
            flows: vec![
                scheduled_flow("f1", true, "0 */4 * * *"),
                scheduled_flow("f2", false, "0 */4 * * *"),
            ],
        });
        let scheduler = FlowScheduler::new(provider, engine());
        scheduler.start_all().await;

        let active = scheduler.active_flow_ids().await;
        assert_eq!(active, vec!["f1".to_string()]);

        scheduler.stop_flow("f1").await;
        assert!(scheduler.active_flow_ids().await.is_empty());
    }

    #[tokio::test]
    async fn manual_trigger_does_not_auto_start() {
        let mut flow = scheduled_flow("f1", true, "");
        flow.nodes[0].subtype = Some("manual".to_string());
        flow.nodes[0].config = json!({});
        let scheduler = FlowScheduler::new(Arc::new(StaticProvider { flows: vec![flow] }), engine());
        scheduler.start_flow("f1").await.unwrap();
        assert!(scheduler.active_flow_ids().await.is_empty());
    }

    #[tokio::test]
    async fn restart_replaces_handle() {
        let provider = Arc::new(StaticProvider {
            flows: vec![scheduled_flow("f1", true, "* * * * *")],
        });
        let scheduler = FlowScheduler::new(provider, engine());
        scheduler.start_flow("f1").await.unwrap();
        scheduler.restart_flow("f1").await.unwrap();
        assert_eq!(scheduler.active_flow_ids().await.len(), 1);
        scheduler.stop_flow("f1").await;
    }
}
