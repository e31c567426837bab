//! Retry policy (spec §4.F: "retry policy" attached per-node).
//!
//! No teacher equivalent — `Idleness76-Weavegraph`'s runner has no retry
//! concept at all; a node error ends the run. Grounded on this crate's
//! `config.rs` builder style (`with_*` consuming-self methods) for the
//! public API, with the backoff formula taken verbatim from spec §4.F.

use std::sync::Arc;
use std::time::Duration;

use crate::node::NodeError;

/// Decides whether a [`RetryPolicy`] applies to a given error (spec §4.F:
/// "match by retry conditions").
#[derive(Clone)]
pub enum RetryCondition {
    /// Matches any node error.
    Always,
    /// Matches only `NodeError::Timeout`.
    TimeoutOnly,
    /// Matches only `NodeError::Failed`.
    FailedOnly,
    /// Caller-supplied predicate.
    Predicate(Arc<dyn Fn(&NodeError) -> bool + Send + Sync>),
}

impl RetryCondition {
    fn matches(&self, error: &NodeError) -> bool {
        match self {
            RetryCondition::Always => true,
            RetryCondition::TimeoutOnly => matches!(error, NodeError::Timeout(_)),
            RetryCondition::FailedOnly => matches!(error, NodeError::Failed { .. }),
            RetryCondition::Predicate(f) => f(error),
        }
    }
}

impl std::fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryCondition::Always => write!(f, "Always"),
            RetryCondition::TimeoutOnly => write!(f, "TimeoutOnly"),
            RetryCondition::FailedOnly => write!(f, "FailedOnly"),
            RetryCondition::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// A node's retry behavior: bounded attempts with exponential backoff (spec
/// §4.F). `interrupt` errors are never retried regardless of `condition` —
/// an interrupt is a deliberate pause, not a failure.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub max_elapsed: Option<Duration>,
    pub jitter: bool,
    condition: RetryCondition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            max_elapsed: None,
            jitter: false,
            condition: RetryCondition::Always,
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    #[must_use]
    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = Some(elapsed);
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: RetryCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Whether this policy should handle `error`.
    #[must_use]
    pub fn matches(&self, error: &NodeError) -> bool {
        !error.is_interrupt() && self.condition.matches(error)
    }

    /// Delay before retry attempt `attempt` (1-indexed: the delay before
    /// the *second* overall try is `delay_for_attempt(1)`). Formula per spec
    /// §4.F: `clamp(initial * factor^(attempt-1), max)`, plus optional
    /// additive jitter uniformly drawn from `[0, clamped_delay)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.mul_f64(self.backoff_factor.powi(exponent));
        let clamped = scaled.min(self.max_delay);
        if self.jitter && !clamped.is_zero() {
            let fraction: f64 = rand::random();
            clamped + clamped.mul_f64(fraction)
        } else {
            clamped
        }
    }

    /// Whether another attempt is still allowed given `attempt` (the attempt
    /// number about to run, 1-indexed) and `elapsed` time since the task
    /// started.
    #[must_use]
    pub fn allows_attempt(&self, attempt: u32, elapsed: Duration) -> bool {
        if attempt > self.max_attempts {
            return false;
        }
        match self.max_elapsed {
            Some(max) => elapsed < max,
            None => true,
        }
    }
}

/// Picks the first policy in `policies` whose condition matches `error`
/// (spec §4.F: "iterate in order to find matching policy").
#[must_use]
pub fn select_policy<'a>(policies: &'a [RetryPolicy], error: &NodeError) -> Option<&'a RetryPolicy> {
    policies.iter().find(|policy| policy.matches(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_clamped() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(350))
            .with_backoff_factor(2.0);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
    }

    #[test]
    fn allows_attempt_respects_max_attempts() {
        let policy = RetryPolicy::new().with_max_attempts(2);
        assert!(policy.allows_attempt(1, Duration::ZERO));
        assert!(policy.allows_attempt(2, Duration::ZERO));
        assert!(!policy.allows_attempt(3, Duration::ZERO));
    }

    #[test]
    fn select_policy_picks_first_match() {
        let policies = vec![
            RetryPolicy::new().with_condition(RetryCondition::TimeoutOnly),
            RetryPolicy::new().with_condition(RetryCondition::Always),
        ];
        let err = NodeError::Failed {
            message: "boom".into(),
        };
        let picked = select_policy(&policies, &err).unwrap();
        assert!(matches!(picked.condition, RetryCondition::Always));
    }

    #[test]
    fn interrupts_are_never_retried() {
        let policy = RetryPolicy::new();
        let signal = crate::node::InterruptSignal::new(serde_json::json!(null));
        assert!(!policy.matches(&NodeError::Interrupt(signal)));
    }
}
