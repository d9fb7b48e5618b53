//! Orchestrator construction options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::layout::BlockLayout;
use super::ShiftDecimatorError;
use crate::dsp::Taps;

/// Largest workgroup the shaders are compiled for.
pub const MAX_WORKGROUP_SIZE: u32 = 1024;

/// Which scheduling strategy to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheduling {
    /// Multi-queue when the context has two compute queues, otherwise single-queue.
    #[default]
    Auto,
    SingleQueue,
    MultiQueue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftDecimatorConfig {
    /// Largest block accepted by `process`, in complex samples.
    pub max_block_size: usize,
    pub workgroup_size: u32,
    pub scheduling: Scheduling,
    /// Bound on every fence wait; `None` waits forever.
    pub fence_timeout_ms: Option<u64>,
    /// Collect GPU timestamps and fence-wait statistics.
    pub perf_counters: bool,
    /// Calls per performance report.
    pub counter_window: usize,
}

impl Default for ShiftDecimatorConfig {
    fn default() -> Self {
        Self {
            max_block_size: 512 * 1024,
            workgroup_size: 64,
            scheduling: Scheduling::Auto,
            fence_timeout_ms: Some(5000),
            perf_counters: true,
            counter_window: 120,
        }
    }
}

impl ShiftDecimatorConfig {
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// Check the options against a taps cascade.
    pub fn validate(&self, taps: &Taps) -> Result<(), ShiftDecimatorError> {
        if self.workgroup_size == 0 || self.workgroup_size > MAX_WORKGROUP_SIZE {
            return Err(ShiftDecimatorError::InvalidConfig(format!(
                "workgroup_size must be in 1..={MAX_WORKGROUP_SIZE}, got {}",
                self.workgroup_size
            )));
        }
        if self.perf_counters && self.counter_window == 0 {
            return Err(ShiftDecimatorError::InvalidConfig(
                "counter_window must be greater than zero".to_string(),
            ));
        }
        if u32::try_from(self.max_block_size).is_err() {
            return Err(ShiftDecimatorError::InvalidConfig(format!(
                "max_block_size {} does not fit in 32 bits",
                self.max_block_size
            )));
        }

        let layout = BlockLayout::new(taps, self.workgroup_size, self.max_block_size);
        layout.validate(self.max_block_size).map_err(|err| {
            ShiftDecimatorError::InvalidConfig(format!("max_block_size is not a valid block: {err}"))
        })
    }
}
