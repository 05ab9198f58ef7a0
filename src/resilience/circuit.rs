use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Per-key breaker parameters. Global defaults come from `EngineConfig`;
/// individual keys may override (e.g. a flakier outbound platform).
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
    pub half_open_probes: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            half_open_probes: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    consecutive_failures: u32,
    first_failure_at: Option<Instant>,
    open_until: Option<Instant>,
    probes_admitted: u32,
}

impl CircuitRecord {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            first_failure_at: None,
            open_until: None,
            probes_admitted: 0,
        }
    }
}

/// Process-wide failure accounting, keyed by `node:<type>` (or an
/// alternative key a node supplies). Survives across runs.
///
/// The key map takes a read lock on the fast path; mutation happens under
/// a per-key lock so independent keys never contend.
pub struct CircuitBreaker {
    defaults: CircuitConfig,
    overrides: RwLock<HashMap<String, CircuitConfig>>,
    records: RwLock<HashMap<String, Arc<Mutex<CircuitRecord>>>>,
}

impl CircuitBreaker {
    pub fn new(defaults: CircuitConfig) -> Self {
        Self {
            defaults,
            overrides: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_key_config(&self, key: impl Into<String>, config: CircuitConfig) {
        self.overrides.write().unwrap().insert(key.into(), config);
    }

    fn config_for(&self, key: &str) -> CircuitConfig {
        self.overrides
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    fn record(&self, key: &str) -> Arc<Mutex<CircuitRecord>> {
        if let Some(record) = self.records.read().unwrap().get(key) {
            return record.clone();
        }
        let mut records = self.records.write().unwrap();
        records
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitRecord::new())))
            .clone()
    }

    /// Whether a call through this key may run now. An open circuit whose
    /// cooldown has elapsed moves to half-open and admits its probes.
    pub fn can_execute(&self, key: &str) -> bool {
        let config = self.config_for(key);
        let record = self.record(key);
        let mut record = record.lock().unwrap();
        let now = Instant::now();

        match record.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                match record.open_until {
                    Some(until) if now >= until => {
                        record.state = CircuitState::HalfOpen;
                        record.probes_admitted = 1;
                        true
                    }
                    _ => false,
                }
            }
            CircuitState::HalfOpen => {
                if record.probes_admitted < config.half_open_probes {
                    record.probes_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, key: &str) {
        let record = self.record(key);
        let mut record = record.lock().unwrap();
        record.state = CircuitState::Closed;
        record.consecutive_failures = 0;
        record.first_failure_at = None;
        record.open_until = None;
        record.probes_admitted = 0;
    }

    pub fn record_failure(&self, key: &str) {
        let config = self.config_for(key);
        let record = self.record(key);
        let mut record = record.lock().unwrap();
        let now = Instant::now();

        if record.state == CircuitState::HalfOpen {
            // Failed probe: straight back to open with a fresh cooldown.
            record.state = CircuitState::Open;
            record.open_until = Some(now + config.cooldown);
            record.probes_admitted = 0;
            return;
        }

        // Failures outside the rolling window start a new streak.
        match record.first_failure_at {
            Some(first) if now.duration_since(first) <= config.window => {
                record.consecutive_failures += 1;
            }
            _ => {
                record.first_failure_at = Some(now);
                record.consecutive_failures = 1;
            }
        }

        if record.consecutive_failures >= config.failure_threshold {
            record.state = CircuitState::Open;
            record.open_until = Some(now + config.cooldown);
            record.probes_admitted = 0;
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        self.record(key).lock().unwrap().state
    }

    /// Snapshot for the administrative surface.
    pub fn snapshot(&self) -> HashMap<String, CircuitState> {
        self.records
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.lock().unwrap().state))
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
