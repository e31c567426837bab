//! Executor configuration (spec §1.3 / §6 "Recognized options").
//!
//! Grounded on the teacher's `runtimes::runtime_config` (`RuntimeConfig`,
//! `EventBusConfig`, `SinkConfig`), trimmed to the options spec §6 actually
//! recognizes and renamed off the teacher's LLM-workflow-flavored
//! `sqlite_db_name` default (`"weavegraph.db"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How sinks are wired onto the executor's event bus at construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

/// Event-bus shape an [`ExecutorConfig`] installs (spec §5: buffered
/// broadcast with configurable sinks).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBusConfig {
    buffer_capacity: usize,
    sinks: Vec<SinkConfig>,
}

/// Capacity of the event sink channel (spec §6: `channelBufferSize`,
/// default 256).
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

impl EventBusConfig {
    #[must_use]
    pub fn new(buffer_capacity: usize, sinks: Vec<SinkConfig>) -> Self {
        let buffer_capacity = if buffer_capacity == 0 {
            DEFAULT_BUFFER_CAPACITY
        } else {
            buffer_capacity
        };
        Self {
            buffer_capacity,
            sinks,
        }
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, vec![SinkConfig::Memory])
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    #[must_use]
    pub fn sinks(&self) -> &[SinkConfig] {
        &self.sinks
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}

/// Run-wide configuration recognized by the executor (spec §6
/// "Configuration" table). Immutable after construction — the executor
/// itself is immutable and safe for concurrent invocations; only
/// per-run `ExecutionContext` state is mutable.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Upper bound on super-steps per run; hitting it terminates normally
    /// (default 100).
    pub max_steps: u64,
    /// Context timeout for each super-step; `None` means no timeout
    /// (default: none).
    pub step_timeout: Option<Duration>,
    /// Context timeout for each node execution. Derived from
    /// `step_timeout / 2` (clamped to >= 1s) when not set explicitly and a
    /// step timeout is configured; otherwise none.
    pub node_timeout: Option<Duration>,
    /// Timeout when writing interrupt checkpoints (default 10s).
    pub checkpoint_save_timeout: Duration,
    pub event_bus: EventBusConfig,
}

impl ExecutorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        if self.node_timeout.is_none() {
            self.node_timeout = Some(derive_node_timeout(timeout));
        }
        self
    }

    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_checkpoint_save_timeout(mut self, timeout: Duration) -> Self {
        self.checkpoint_save_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }

    #[must_use]
    pub fn with_stdout_event_bus(mut self) -> Self {
        self.event_bus = EventBusConfig::with_stdout_only();
        self
    }

    #[must_use]
    pub fn with_memory_event_bus(mut self) -> Self {
        self.event_bus = EventBusConfig::with_memory_sink();
        self
    }
}

/// `nodeTimeout = stepTimeout / 2`, clamped to >= 1s (spec §6 table).
fn derive_node_timeout(step_timeout: Duration) -> Duration {
    (step_timeout / 2).max(Duration::from_secs(1))
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            step_timeout: None,
            node_timeout: None,
            checkpoint_save_timeout: Duration::from_secs(10),
            event_bus: EventBusConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_table() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_steps, 100);
        assert!(config.step_timeout.is_none());
        assert!(config.node_timeout.is_none());
        assert_eq!(config.checkpoint_save_timeout, Duration::from_secs(10));
    }

    #[test]
    fn step_timeout_derives_node_timeout_when_unset() {
        let config = ExecutorConfig::new().with_step_timeout(Duration::from_secs(10));
        assert_eq!(config.node_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn derived_node_timeout_clamps_to_one_second() {
        let config = ExecutorConfig::new().with_step_timeout(Duration::from_millis(500));
        assert_eq!(config.node_timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn explicit_node_timeout_is_not_overridden() {
        let config = ExecutorConfig::new()
            .with_node_timeout(Duration::from_secs(3))
            .with_step_timeout(Duration::from_secs(100));
        assert_eq!(config.node_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn event_bus_buffer_capacity_falls_back_to_default_on_zero() {
        let bus = EventBusConfig::new(0, vec![SinkConfig::StdOut]);
        assert_eq!(bus.buffer_capacity(), DEFAULT_BUFFER_CAPACITY);
    }
}
