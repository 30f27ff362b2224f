//! Server manager configuration

use composition_system::PipelineOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and pipeline settings used by [`crate::ServerManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Upper bound for one storage call
    pub persist_timeout: Duration,
    /// Upper bound for one container inspection
    pub inspect_timeout: Duration,
    /// Capacity of each composition run's packet queue
    pub channel_capacity: usize,
    /// Apply default compositions before the requested ones
    pub apply_defaults: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            persist_timeout: Duration::from_secs(10),
            inspect_timeout: Duration::from_secs(15),
            channel_capacity: 32,
            apply_defaults: true,
        }
    }
}

impl ManagerConfig {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            channel_capacity: self.channel_capacity,
            apply_defaults: self.apply_defaults,
        }
    }
}
