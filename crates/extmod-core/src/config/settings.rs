//! Module settings store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits and locking policy for the module settings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Bounded wait for the per-(module, project) write lock, in milliseconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
    /// Maximum key length in bytes.
    #[serde(default = "default_key_size_limit")]
    pub key_size_limit: usize,
    /// Maximum encoded value length in bytes.
    #[serde(default = "default_value_size_limit")]
    pub value_size_limit: usize,
}

impl SettingsConfig {
    /// Returns the lock wait as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout(),
            key_size_limit: default_key_size_limit(),
            value_size_limit: default_value_size_limit(),
        }
    }
}

fn default_lock_timeout() -> u64 {
    5_000
}

fn default_key_size_limit() -> usize {
    255
}

// MEDIUMTEXT-sized, matching the largest value existing modules store.
fn default_value_size_limit() -> usize {
    16_777_215
}
