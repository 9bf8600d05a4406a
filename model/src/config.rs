use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Upper bound on any single call into the remote introspector
    pub introspection_timeout: Duration,
    pub default_copy_config: bool,
    /// Number of deployment records the promotion log keeps
    pub history_limit: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            introspection_timeout: Duration::from_secs(10),
            default_copy_config: true,
            history_limit: 1000,
        }
    }
}

impl ConsoleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_introspection_timeout(mut self, timeout: Duration) -> Self {
        self.introspection_timeout = timeout;
        self
    }

    pub fn with_default_copy_config(mut self, copy_config: bool) -> Self {
        self.default_copy_config = copy_config;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.introspection_timeout.is_zero() {
            return Err("Introspection timeout must be greater than 0".to_string());
        }

        if self.history_limit == 0 {
            return Err("History limit must be greater than 0".to_string());
        }

        Ok(())
    }
}
