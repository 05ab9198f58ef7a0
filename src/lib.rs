pub mod config;
pub mod error;
pub mod flows;
pub mod nodes;
pub mod resilience;
pub mod services;

pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, NodeError};
pub use flows::runner::{ExecuteOptions, FlowEngine};
pub use flows::{Edge, Flow, Node, TriggerDescriptor};
