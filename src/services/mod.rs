pub mod ai;
pub mod messaging;
pub mod stub;
pub mod webhook;

use std::sync::Arc;

use ai::AiService;
use messaging::Messaging;

/// The collaborator bundle handed to node executors. Cloneable so it can
/// be shared across parallel branch tasks.
#[derive(Clone)]
pub struct Services {
    pub ai: Arc<dyn AiService>,
    pub messaging: Arc<dyn Messaging>,
}

impl Services {
    pub fn new(ai: Arc<dyn AiService>, messaging: Arc<dyn Messaging>) -> Self {
        Self { ai, messaging }
    }

    /// Stub-backed bundle for tests and offline CLI runs.
    pub fn stubbed() -> Self {
        Self {
            ai: Arc::new(stub::StubAi::new()),
            messaging: Arc::new(stub::StubMessaging::new()),
        }
    }
}
