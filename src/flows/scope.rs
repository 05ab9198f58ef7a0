use std::collections::HashMap;

use serde_json::{Map, Value};

use super::TriggerDescriptor;

/// The lookup tree `{{path}}` references resolve against.
///
/// Four roots: `input` (the execution input), `variables` (mutable map
/// populated by nodes), `nodes` (node-id → last successful output), and
/// `trigger` (descriptor of what initiated the run).
#[derive(Debug, Clone)]
pub struct ContextScope {
    pub input: Value,
    pub variables: HashMap<String, Value>,
    pub node_outputs: HashMap<String, Value>,
    pub trigger: TriggerDescriptor,
}

impl ContextScope {
    pub fn new(input: Value, trigger: TriggerDescriptor) -> Self {
        Self {
            input,
            variables: HashMap::new(),
            node_outputs: HashMap::new(),
            trigger,
        }
    }

    /// Resolve a dotted path (`nodes.abc.body.items.0.title`) to a leaf.
    /// Returns `None` for unknown roots or missing segments.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;

        match root {
            "input" => descend(&self.input, segments),
            "variables" => {
                let name = segments.next()?;
                let value = self.variables.get(name)?;
                descend(value, segments)
            }
            "nodes" => {
                let node_id = segments.next()?;
                let value = self.node_outputs.get(node_id)?;
                descend(value, segments)
            }
            "trigger" => {
                let trigger = serde_json::to_value(&self.trigger).ok()?;
                descend(&trigger, segments)
            }
            _ => None,
        }
    }

    /// Union of `variables` plus the last successful output of every listed
    /// terminal node, used as the execution's final output.
    pub fn final_output(&self, terminal_node_ids: &[String]) -> Value {
        let mut out = Map::new();
        let mut variables = Map::new();
        for (name, value) in &self.variables {
            variables.insert(name.clone(), value.clone());
        }
        out.insert("variables".to_string(), Value::Object(variables));

        let mut nodes = Map::new();
        for id in terminal_node_ids {
            if let Some(output) = self.node_outputs.get(id) {
                nodes.insert(id.clone(), output.clone());
            }
        }
        out.insert("nodes".to_string(), Value::Object(nodes));
        Value::Object(out)
    }
}

fn descend<'a, I>(value: &'a Value, segments: I) -> Option<Value>
where
    I: Iterator<Item = &'a str>,
{
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}
