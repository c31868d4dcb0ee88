//! Typed configuration for the data lifecycle manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`crate::Dlm`] instance. Deserializable from the same
/// config file a node manager loads its own settings from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DlmConfig {
    /// How often the sweeper scans for expired/orphaned drops.
    pub sweep_interval_secs: u64,
    /// Default replica count for drops that don't specify their own.
    pub default_replicas: u32,
}

impl Default for DlmConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 10,
            default_replicas: 0,
        }
    }
}

impl DlmConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
