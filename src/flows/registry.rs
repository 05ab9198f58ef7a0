use std::collections::HashMap;
use std::sync::Arc;

use super::Node;
use crate::nodes::NodeExecutor;

/// Maps node-type identifiers to executor instances.
///
/// Lookup order for a node: the literal type, the `type:subtype`
/// compound, then the legacy alias table (front-end schema drift ships
/// subtype names like `ai_response` long after the backend renamed
/// them). Unresolved nodes are skipped by the engine, not failed.
///
/// Built once at startup; read-only during execution.
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
    aliases: HashMap<String, String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Registry with every built-in node kind and the legacy alias table.
    pub fn with_builtin_nodes() -> Self {
        use crate::nodes::{
            ai::AiExecutor, condition::ConditionExecutor, delay::DelayExecutor,
            loop_node::LoopExecutor, parallel::ParallelExecutor, send::SendExecutor,
            trigger::TriggerExecutor, variable::SetVariableExecutor,
            wait_reply::WaitForReplyExecutor,
        };

        let mut registry = Self::new();
        registry.register(Arc::new(TriggerExecutor));
        registry.register(Arc::new(SetVariableExecutor));
        registry.register(Arc::new(ConditionExecutor));
        registry.register(Arc::new(DelayExecutor));
        registry.register(Arc::new(LoopExecutor));
        registry.register(Arc::new(AiExecutor));
        registry.register(Arc::new(SendExecutor));
        registry.register(Arc::new(WaitForReplyExecutor));
        registry.register(Arc::new(ParallelExecutor));

        for &(from, to) in DEFAULT_ALIASES {
            registry.alias(from, to);
        }
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.type_name().to_string(), executor);
    }

    pub fn alias(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.aliases.insert(from.into(), to.into());
    }

    /// Resolve the executor for a node, or `None` when the type is
    /// unknown (the engine records a skip).
    pub fn resolve(&self, node: &Node) -> Option<Arc<dyn NodeExecutor>> {
        if let Some(executor) = self.lookup(&node.node_type) {
            return Some(executor);
        }
        if let Some(subtype) = &node.subtype {
            let compound = format!("{}:{}", node.node_type, subtype);
            if let Some(executor) = self.lookup(&compound) {
                return Some(executor);
            }
            if let Some(executor) = self.lookup(subtype) {
                return Some(executor);
            }
        }
        None
    }

    /// Direct or alias lookup. Aliases may chain one level
    /// (`ai_response` → `ai:chatCompletion` → `ai`).
    fn lookup(&self, key: &str) -> Option<Arc<dyn NodeExecutor>> {
        let mut key = key;
        for _ in 0..3 {
            if let Some(executor) = self.executors.get(key) {
                return Some(executor.clone());
            }
            key = self.aliases.get(key)?.as_str();
        }
        None
    }

    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtin_nodes()
    }
}

/// Legacy front-end subtype names still seen in stored flows.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("ai:chatCompletion", "ai"),
    ("ai_response", "ai:chatCompletion"),
    ("messaging:sendText", "messaging"),
    ("messaging:sendWhatsApp", "messaging"),
    ("messaging:sendTelegram", "messaging"),
    ("messaging:sendEmail", "messaging"),
    ("messaging:sendWebhook", "messaging"),
    ("send_whatsapp", "messaging:sendWhatsApp"),
    ("send_telegram", "messaging:sendTelegram"),
    ("send_email", "messaging:sendEmail"),
    ("send_message", "messaging:sendText"),
    ("wait_reply", "waitForReply"),
    ("wait:reply", "waitForReply"),
    ("set_var", "setVariable"),
    ("setVar", "setVariable"),
    ("if", "condition"),
    ("branch", "condition"),
    ("wait", "delay"),
    ("sleep", "delay"),
];
