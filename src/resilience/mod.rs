pub mod circuit;

use std::time::Duration;

use rand::Rng;
use serde_json::Value;

/// Named error-recovery policy attached to a node, declared under the
/// node config's `onError` key. Defaults to `fail`.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorStrategy {
    /// Surface the error; terminate the flow unless a `failed` edge exists.
    Fail,
    /// Retry with exponential backoff; only for recoverable errors.
    Retry(RetryPolicy),
    /// Produce a synthetic `{skipped: true, reason}` output and continue.
    Skip,
    /// Route to a named fallback node in lieu of the failing branch.
    Redirect { target: String },
    /// Produce a static output from config and continue.
    FallbackOutput { output: Value },
}

impl ErrorStrategy {
    /// Parse from a node's config. Accepts a bare string
    /// (`"onError": "skip"`) or an object with per-strategy fields.
    pub fn from_config(config: &Value) -> Self {
        let spec = &config["onError"];
        match spec {
            Value::String(name) => Self::from_parts(name, spec),
            Value::Object(_) => {
                let name = spec["strategy"].as_str().unwrap_or("fail");
                Self::from_parts(name, spec)
            }
            _ => ErrorStrategy::Fail,
        }
    }

    fn from_parts(name: &str, spec: &Value) -> Self {
        match name {
            "retry" => ErrorStrategy::Retry(RetryPolicy::from_config(spec)),
            "skip" => ErrorStrategy::Skip,
            "redirect" => match spec["target"].as_str() {
                Some(target) => ErrorStrategy::Redirect {
                    target: target.to_string(),
                },
                // A redirect without a target cannot route anywhere.
                None => ErrorStrategy::Fail,
            },
            "fallbackOutput" | "fallback-output" => ErrorStrategy::FallbackOutput {
                output: spec.get("output").cloned().unwrap_or(Value::Null),
            },
            _ => ErrorStrategy::Fail,
        }
    }
}

/// Exponential backoff: `base * factor^(attempt-1)`, capped at
/// `max_delay`, with optional jitter scaling into `[0.5, 1.0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(spec: &Value) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: spec["maxRetries"]
                .as_u64()
                .map(|n| n as u32)
                .unwrap_or(defaults.max_retries),
            base: spec["backoffMs"]
                .as_u64()
                .map(Duration::from_millis)
                .unwrap_or(defaults.base),
            factor: spec["factor"].as_f64().unwrap_or(defaults.factor),
            max_delay: spec["maxDelayMs"]
                .as_u64()
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            jitter: spec["jitter"].as_bool().unwrap_or(defaults.jitter),
        }
    }

    /// Backoff before retry `attempt` (1-based: the delay after the
    /// attempt-th failure).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let raw = self.base.as_secs_f64() * exp;
        let capped = raw.min(self.max_delay.as_secs_f64());
        let scaled = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.0)
        } else {
            capped
        };
        Duration::from_secs_f64(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_strategy_is_fail() {
        assert_eq!(ErrorStrategy::from_config(&json!({})), ErrorStrategy::Fail);
        assert_eq!(
            ErrorStrategy::from_config(&json!({"onError": 42})),
            ErrorStrategy::Fail
        );
    }

    #[test]
    fn parses_bare_string_form() {
        assert_eq!(
            ErrorStrategy::from_config(&json!({"onError": "skip"})),
            ErrorStrategy::Skip
        );
    }

    #[test]
    fn parses_retry_with_overrides() {
        let strategy = ErrorStrategy::from_config(&json!({
            "onError": {
                "strategy": "retry",
                "maxRetries": 5,
                "backoffMs": 100,
                "factor": 3.0,
                "maxDelayMs": 2000,
                "jitter": true
            }
        }));
        let ErrorStrategy::Retry(policy) = strategy else {
            panic!("expected retry");
        };
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.base, Duration::from_millis(100));
        assert_eq!(policy.factor, 3.0);
        assert_eq!(policy.max_delay, Duration::from_millis(2000));
        assert!(policy.jitter);
    }

    #[test]
    fn parses_redirect_and_fallback() {
        assert_eq!(
            ErrorStrategy::from_config(
                &json!({"onError": {"strategy": "redirect", "target": "recover-1"}})
            ),
            ErrorStrategy::Redirect {
                target: "recover-1".to_string()
            }
        );
        assert_eq!(
            ErrorStrategy::from_config(
                &json!({"onError": {"strategy": "fallbackOutput", "output": {"ok": false}}})
            ),
            ErrorStrategy::FallbackOutput {
                output: json!({"ok": false})
            }
        );
    }

    #[test]
    fn redirect_without_target_degrades_to_fail() {
        assert_eq!(
            ErrorStrategy::from_config(&json!({"onError": {"strategy": "redirect"}})),
            ErrorStrategy::Fail
        );
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_millis(350),
            jitter: false,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        // 400ms capped at 350ms.
        assert_eq!(policy.delay(3), Duration::from_millis(350));
        assert_eq!(policy.delay(10), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: true,
            base: Duration::from_millis(1000),
            factor: 1.0,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let d = policy.delay(1);
            assert!(d >= Duration::from_millis(500), "{d:?} below jitter floor");
            assert!(d < Duration::from_millis(1000), "{d:?} above jitter ceiling");
        }
    }
}
