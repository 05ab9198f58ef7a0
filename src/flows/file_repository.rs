use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::history::{Execution, MAX_EXECUTIONS_PER_FLOW};
use super::repository::ExecutionRepository;

/// File-backed repository: executions live as pretty-printed JSON under
/// `<base_dir>/executions/<flow_id>/<execution_id>.json`, mirrored in
/// memory for reads. Oldest files are evicted past the per-flow cap.
pub struct FileExecutionRepository {
    base_dir: PathBuf,
    executions: RwLock<HashMap<String, VecDeque<Execution>>>,
}

impl FileExecutionRepository {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Default data directory: `~/.dagon`.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dagon")
    }

    fn executions_dir(&self) -> PathBuf {
        self.base_dir.join("executions")
    }

    fn execution_file(&self, flow_id: &str, execution_id: &str) -> PathBuf {
        self.executions_dir()
            .join(flow_id)
            .join(format!("{execution_id}.json"))
    }

    fn flush(&self, execution: &Execution) -> Result<()> {
        let dir = self.executions_dir().join(&execution.flow_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create executions dir: {}", dir.display()))?;
        let path = dir.join(format!("{}.json", execution.id));
        let content =
            serde_json::to_string_pretty(execution).context("failed to serialize execution")?;
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write execution file: {}", path.display()))?;
        Ok(())
    }

    /// Load every persisted execution into the in-memory mirror.
    pub async fn load_all(&self) -> Result<()> {
        let root = self.executions_dir();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create executions dir: {}", root.display()))?;

        let mut loaded: HashMap<String, VecDeque<Execution>> = HashMap::new();
        let mut count = 0usize;

        for flow_entry in std::fs::read_dir(&root)
            .with_context(|| format!("failed to read executions dir: {}", root.display()))?
        {
            let flow_dir = flow_entry?.path();
            if !flow_dir.is_dir() {
                continue;
            }
            let mut executions: Vec<Execution> = Vec::new();
            for entry in std::fs::read_dir(&flow_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                match serde_json::from_str::<Execution>(&content) {
                    Ok(execution) => executions.push(execution),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable execution file");
                    }
                }
            }
            executions.sort_by_key(|e| e.created_at);
            count += executions.len();
            let flow_id = match executions.first() {
                Some(first) => first.flow_id.clone(),
                None => continue,
            };
            loaded.insert(flow_id, executions.into_iter().collect());
        }

        tracing::info!(count, "Loaded persisted executions");
        *self.executions.write().await = loaded;
        Ok(())
    }
}

#[async_trait]
impl ExecutionRepository for FileExecutionRepository {
    async fn insert(&self, execution: &Execution) -> Result<()> {
        self.flush(execution)?;

        let mut executions = self.executions.write().await;
        let queue = executions.entry(execution.flow_id.clone()).or_default();
        queue.push_back(execution.clone());
        while queue.len() > MAX_EXECUTIONS_PER_FLOW {
            if let Some(old) = queue.pop_front() {
                let path = self.execution_file(&old.flow_id, &old.id);
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> Result<()> {
        self.flush(execution)?;

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
