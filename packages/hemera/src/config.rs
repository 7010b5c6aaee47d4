//! Dispatch configuration: call timeout and router strategy.

use std::time::Duration;

use hemera_core::IndexingStrategy;

/// Default `act` timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Dispatch-level configuration, fixed at construction time.
#[derive(Debug, Clone)]
pub struct HemeraConfig {
    /// Maximum time an `act` waits for its reply.
    pub timeout: Duration,
    /// Tie-break policy of the pattern router.
    pub strategy: IndexingStrategy,
}

impl HemeraConfig {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: IndexingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Timeout in whole milliseconds, saturating.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for HemeraConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            strategy: IndexingStrategy::Depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hemera_config_defaults() {
        let config = HemeraConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.timeout_ms(), 2000);
        assert_eq!(config.strategy, IndexingStrategy::Depth);
    }

    #[test]
    fn setters_override_defaults() {
        let config = HemeraConfig::default()
            .with_timeout(Duration::from_millis(50))
            .with_strategy(IndexingStrategy::Insertion);
        assert_eq!(config.timeout_ms(), 50);
        assert_eq!(config.strategy, IndexingStrategy::Insertion);
    }
}
