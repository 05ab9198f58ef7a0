use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::history::{Execution, MAX_EXECUTIONS_PER_FLOW};

/// Durable record of execution lifecycle: insert once at start, update on
/// every lifecycle change with the full serialized state.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn insert(&self, execution: &Execution) -> Result<()>;

    async fn update(&self, execution: &Execution) -> Result<()>;

    async fn get(&self, execution_id: &str) -> Option<Execution>;

    /// Most recent first.
    async fn list_for_flow(&self, flow_id: &str, limit: usize) -> Vec<Execution>;
}

/// In-memory repository for tests and embedders that do not want disk.
/// Retains the most recent executions per flow.
pub struct MemoryExecutionRepository {
    executions: RwLock<HashMap<String, VecDeque<Execution>>>,
}

impl MemoryExecutionRepository {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryExecutionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionRepository for MemoryExecutionRepository {
    async fn insert(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        let queue = executions.entry(execution.flow_id.clone()).or_default();
        queue.push_back(execution.clone());
        while queue.len() > MAX_EXECUTIONS_PER_FLOW {
            queue.pop_front();
        }
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        if let Some(queue) = executions.get_mut(&execution.flow_id) {
            if let Some(slot) = queue.iter_mut().find(|e| e.id == execution.id) {
                *slot = execution.clone();
            }
        }
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Option<Execution> {
        let executions = self.executions.read().await;
        executions
            .values()
            .flat_map(|q| q.iter())
            .find(|e| e.id == execution_id)
            .cloned()
    }

    async fn list_for_flow(&self, flow_id: &str, limit: usize) -> Vec<Execution> {
        let executions = self.executions.read().await;
        executions
            .get(flow_id)
            .map(|q| q.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}
