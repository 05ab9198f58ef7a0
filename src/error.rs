use serde::{Deserialize, Serialize};

/// Machine-readable classification of a node failure.
///
/// Strategy handling keys off the kind: `Cancelled` and `Timeout` bypass
/// recovery strategies entirely, `Validation` is never recoverable, and
/// `CircuitOpen` only clears after the breaker cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    Timeout,
    Cancelled,
    CircuitOpen,
    NodeFailed,
    External,
    Resource,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::CircuitOpen => "circuit-open",
            ErrorKind::NodeFailed => "node-failed",
            ErrorKind::External => "external",
            ErrorKind::Resource => "resource",
        }
    }
}

/// A failure raised by (or on behalf of) a single node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{} error: {message}", .kind.as_str())]
pub struct NodeError {
    pub kind: ErrorKind,
    pub message: String,
    pub recoverable: bool,
}

impl NodeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let recoverable = matches!(kind, ErrorKind::External | ErrorKind::Resource);
        Self {
            kind,
            message: message.into(),
            recoverable,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::External, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    /// Wrap a cause as the composite `node-failed` kind, keeping the cause
    /// text in the message. Recoverability follows the cause.
    pub fn node_failed(node_id: &str, cause: &NodeError) -> Self {
        Self {
            kind: ErrorKind::NodeFailed,
            message: format!("node '{}' failed: {}", node_id, cause.message),
            recoverable: cause.recoverable,
        }
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Cancellation and timeout terminate traversal regardless of the
    /// node's declared strategy.
    pub fn bypasses_strategies(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::Timeout)
    }
}

/// Errors from the engine surface itself (as opposed to a node outcome).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("flow '{0}' has no nodes")]
    EmptyFlow(String),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("persistence: {0}")]
    Persistence(#[from] anyhow::Error),
}
