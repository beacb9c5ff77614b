//! Background task policies and configuration.

use std::time::Duration;

/// What to do with a background task that runs too long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// No timeout - task runs until completion.
    #[default]
    None,
    /// Cancel task after specified duration.
    Cancel(Duration),
}

/// Configuration for the [`OffloadManager`](super::OffloadManager).
#[derive(Debug, Clone)]
pub struct OffloadConfig {
    /// Timeout policy for spawned tasks.
    pub timeout_policy: TimeoutPolicy,
    /// Skip a keyed task while another with the same key is in flight.
    pub deduplicate: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            timeout_policy: TimeoutPolicy::None,
            deduplicate: true,
        }
    }
}

impl OffloadConfig {
    /// Create a new builder for OffloadConfig.
    pub fn builder() -> OffloadConfigBuilder {
        OffloadConfigBuilder::new()
    }
}

/// Builder for [`OffloadConfig`].
#[derive(Debug, Clone)]
pub struct OffloadConfigBuilder {
    config: OffloadConfig,
}

impl OffloadConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: OffloadConfig::default(),
        }
    }

    /// Set timeout policy.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.timeout_policy = policy;
        self
    }

    /// Cancel tasks that run longer than `duration`.
    pub fn timeout(self, duration: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Cancel(duration))
    }

    /// Enable or disable task deduplication.
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.config.deduplicate = enabled;
        self
    }

    /// Build the OffloadConfig.
    pub fn build(self) -> OffloadConfig {
        self.config
    }
}

impl Default for OffloadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
