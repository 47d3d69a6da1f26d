//! Configuration for uplinks and state managers.

use std::time::Duration;

/// Configuration for [`crate::RepositoryUplink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UplinkConfig {
    /// How often `poll` re-fetches while waiting for the head to move (in
    /// milliseconds).
    pub poll_interval_ms: u64,
    /// How long `poll` waits before returning an unchanged head (in
    /// milliseconds).
    pub poll_timeout_ms: u64,
    /// Merge divergent heads during fetch and push. When disabled, a fetch
    /// that finds several heads leaves the client where it is.
    pub merge_on_fetch: bool,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            poll_timeout_ms: 5000,
            merge_on_fetch: true,
        }
    }
}

impl UplinkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Builder for uplink configuration.
pub struct UplinkConfigBuilder {
    config: UplinkConfig,
}

impl UplinkConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: UplinkConfig::default(),
        }
    }

    pub fn poll_interval(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn poll_timeout(mut self, ms: u64) -> Self {
        self.config.poll_timeout_ms = ms;
        self
    }

    pub fn merge_on_fetch(mut self, enabled: bool) -> Self {
        self.config.merge_on_fetch = enabled;
        self
    }

    pub fn build(self) -> UplinkConfig {
        self.config
    }
}

impl Default for UplinkConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`crate::StateManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateManagerConfig {
    /// Squash working diffs after they were rebased onto remote changes.
    pub squash_on_rebase: bool,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            squash_on_rebase: true,
        }
    }
}

/// Builder for state manager configuration.
pub struct StateManagerConfigBuilder {
    config: StateManagerConfig,
}

impl StateManagerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StateManagerConfig::default(),
        }
    }

    pub fn squash_on_rebase(mut self, enabled: bool) -> Self {
        self.config.squash_on_rebase = enabled;
        self
    }

    pub fn build(self) -> StateManagerConfig {
        self.config
    }
}

impl Default for StateManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
