use std::time::Duration;

/// Engine configuration loaded from environment variables.
///
/// Mirrors the deploy-time knobs: execution deadline, parallel fan-out
/// bounds, circuit breaker defaults, and the wait coordinator poll
/// interval. Every field has a default so a bare environment works.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default per-execution deadline.
    pub execution_timeout: Duration,
    /// Max concurrent branches per parallel node.
    pub max_parallel_branches: usize,
    /// Process-wide cap on concurrently running branches.
    pub global_branch_cap: usize,
    /// Consecutive failures before a circuit opens.
    pub circuit_failure_threshold: u32,
    /// Rolling window in which failures are counted.
    pub circuit_window: Duration,
    /// How long an open circuit stays open before a half-open probe.
    pub circuit_cooldown: Duration,
    /// Poll interval for wait-for-reply deadline checks.
    pub wait_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout: Duration::from_secs(300),
            max_parallel_branches: 32,
            global_branch_cap: 256,
            circuit_failure_threshold: 5,
            circuit_window: Duration::from_secs(60),
            circuit_cooldown: Duration::from_secs(30),
            wait_poll_interval: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_raw_values(
            std::env::var("DAGON_EXECUTION_TIMEOUT_SECS").ok().as_deref(),
            std::env::var("DAGON_MAX_PARALLEL_BRANCHES").ok().as_deref(),
            std::env::var("DAGON_GLOBAL_BRANCH_CAP").ok().as_deref(),
            std::env::var("DAGON_CIRCUIT_THRESHOLD").ok().as_deref(),
            std::env::var("DAGON_CIRCUIT_WINDOW_SECS").ok().as_deref(),
            std::env::var("DAGON_CIRCUIT_COOLDOWN_SECS").ok().as_deref(),
            std::env::var("DAGON_WAIT_POLL_MS").ok().as_deref(),
        )
    }

    /// Build a config from raw string values (as they would come from env
    /// vars). Used directly in tests to avoid mutating process-global
    /// environment.
    pub fn from_raw_values(
        execution_timeout_secs: Option<&str>,
        max_parallel_branches: Option<&str>,
        global_branch_cap: Option<&str>,
        circuit_threshold: Option<&str>,
        circuit_window_secs: Option<&str>,
        circuit_cooldown_secs: Option<&str>,
        wait_poll_ms: Option<&str>,
    ) -> Self {
        let defaults = Self::default();

        fn parse<T: std::str::FromStr>(raw: Option<&str>, fallback: T) -> T {
            raw.and_then(|v| v.parse().ok()).unwrap_or(fallback)
        }

        Self {
            execution_timeout: Duration::from_secs(parse(
                execution_timeout_secs,
                defaults.execution_timeout.as_secs(),
            )),
            max_parallel_branches: parse(
                max_parallel_branches,
                defaults.max_parallel_branches,
            )
            .max(1),
            global_branch_cap: parse(global_branch_cap, defaults.global_branch_cap).max(1),
            circuit_failure_threshold: parse(
                circuit_threshold,
                defaults.circuit_failure_threshold,
            )
            .max(1),
            circuit_window: Duration::from_secs(parse(
                circuit_window_secs,
                defaults.circuit_window.as_secs(),
            )),
            circuit_cooldown: Duration::from_secs(parse(
                circuit_cooldown_secs,
                defaults.circuit_cooldown.as_secs(),
            )),
            wait_poll_interval: Duration::from_millis(parse(
                wait_poll_ms,
                defaults.wait_poll_interval.as_millis() as u64,
            )),
        }
    }
}
