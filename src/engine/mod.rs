//! Double-buffered shift-decimator orchestration.
//!
//! A shift-decimator rotates a block of complex samples by a caller-supplied
//! phase ramp, then low-pass filters and decimates it by 2 once per taps
//! stage. Two interchangeable strategies run the cascade on the GPU:
//!
//! - [`SingleQueueShiftDecimator`]: two slots on one queue, two command buffers per slot
//! - [`MultiQueueShiftDecimator`]: one slot per queue, three semaphore-chained batches per slot
//!
//! Both return, on each call, the output of the block supplied on the
//! previous call. The first call returns zeros.

mod config;
mod counters;
mod layout;
mod multi_queue;
mod resources;
mod single_queue;
mod slots;

use std::sync::Arc;

pub use config::{Scheduling, ShiftDecimatorConfig, MAX_WORKGROUP_SIZE};
pub use counters::{FenceWaitStat, PerfCounters, PerfReport, StageStat, Stat};
pub use layout::BlockLayout;
pub use multi_queue::MultiQueueShiftDecimator;
pub use single_queue::SingleQueueShiftDecimator;
pub use slots::SlotPair;

use crate::dsp::{Taps, TapsError};
use crate::gpu::{Context, GpuError};

#[derive(Debug, thiserror::Error)]
pub enum ShiftDecimatorError {
    #[error("Invalid taps: {0}")]
    InvalidTaps(#[from] TapsError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Sample count must be greater than zero")]
    EmptyBlock,
    #[error("Sample count {count} is not a multiple of {multiple}")]
    Misaligned { count: usize, multiple: usize },
    #[error("Sample count {count} exceeds the maximum block size {max}")]
    BlockTooLarge { count: usize, max: usize },
    #[error("Stage {stage} receives {input} samples, fewer than its {history}-sample history")]
    ShorterThanHistory {
        stage: usize,
        input: usize,
        history: usize,
    },
    #[error("Sample buffer holds {len} floats, {needed} required")]
    BufferTooSmall { needed: usize, len: usize },
    #[error("Shift-decimator is unusable after an earlier GPU failure")]
    Poisoned,
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

impl ShiftDecimatorError {
    /// Whether the shift-decimator that returned this error can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Poisoned | Self::Gpu(_))
    }
}

/// A shift-decimator cascade over interleaved `re, im` float blocks.
pub trait ShiftDecimate {
    /// Shift `sample_count` complex samples by `phi + omega * n`, filter and
    /// decimate them, and write the result over the front of `samples`.
    ///
    /// Returns the number of complex samples written. For pipelined
    /// implementations this is the output of the block supplied `latency()`
    /// calls earlier.
    fn process(
        &mut self,
        samples: &mut [f32],
        sample_count: usize,
        phi: f32,
        omega: f32,
    ) -> Result<usize, ShiftDecimatorError>;

    fn stage_count(&self) -> usize;

    /// Overall decimation factor.
    fn decimation(&self) -> usize {
        1 << self.stage_count()
    }

    /// Calls between supplying a block and receiving its output.
    fn latency(&self) -> usize;
}

/// GPU shift-decimator with the strategy picked at construction.
pub enum ShiftDecimator {
    SingleQueue(Box<SingleQueueShiftDecimator>),
    MultiQueue(Box<MultiQueueShiftDecimator>),
}

impl ShiftDecimator {
    /// Build the strategy `config.scheduling` asks for.
    ///
    /// A multi-queue request on a context with one queue falls back to single-queue.
    pub fn new(
        context: &Arc<Context>,
        taps: Taps,
        config: &ShiftDecimatorConfig,
    ) -> Result<Self, ShiftDecimatorError> {
        let queues = context.queue_count();
        let multi_queue = match config.scheduling {
            Scheduling::SingleQueue => false,
            Scheduling::Auto => queues >= 2,
            Scheduling::MultiQueue if queues < 2 => {
                log::warn!(
                    "Multi-queue scheduling requested but {} has {queues} compute queue(s), using single-queue",
                    context.info().name
                );
                false
            }
            Scheduling::MultiQueue => true,
        };

        if multi_queue {
            MultiQueueShiftDecimator::new(context, taps, config)
                .map(|engine| Self::MultiQueue(Box::new(engine)))
        } else {
            SingleQueueShiftDecimator::new(context, taps, config)
                .map(|engine| Self::SingleQueue(Box::new(engine)))
        }
    }

    /// The strategy actually in use.
    pub fn scheduling(&self) -> Scheduling {
        match self {
            Self::SingleQueue(_) => Scheduling::SingleQueue,
            Self::MultiQueue(_) => Scheduling::MultiQueue,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleQueue(_) => SingleQueueShiftDecimator::NAME,
            Self::MultiQueue(_) => MultiQueueShiftDecimator::NAME,
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        match self {
            Self::SingleQueue(engine) => engine.layout(),
            Self::MultiQueue(engine) => engine.layout(),
        }
    }

    pub fn is_poisoned(&self) -> bool {
        match self {
            Self::SingleQueue(engine) => engine.is_poisoned(),
            Self::MultiQueue(engine) => engine.is_poisoned(),
        }
    }

    /// Samples the next call returns if it supplies `sample_count` samples:
    /// the previous block's output, or zeros sized for this block on the first call.
    pub fn pending_output_len(&self, sample_count: usize) -> usize {
        match self {
            Self::SingleQueue(engine) => engine.pending_output_len(sample_count),
            Self::MultiQueue(engine) => engine.pending_output_len(sample_count),
        }
    }

    /// Most recent completed counter window, if counters are enabled.
    pub fn perf_report(&self) -> Option<&PerfReport> {
        match self {
            Self::SingleQueue(engine) => engine.perf_report(),
            Self::MultiQueue(engine) => engine.perf_report(),
        }
    }
}

impl ShiftDecimate for ShiftDecimator {
    fn process(
        &mut self,
        samples: &mut [f32],
        sample_count: usize,
        phi: f32,
        omega: f32,
    ) -> Result<usize, ShiftDecimatorError> {
        match self {
            Self::SingleQueue(engine) => engine.process(samples, sample_count, phi, omega),
            Self::MultiQueue(engine) => engine.process(samples, sample_count, phi, omega),
        }
    }

    fn stage_count(&self) -> usize {
        match self {
            Self::SingleQueue(engine) => engine.stage_count(),
            Self::MultiQueue(engine) => engine.stage_count(),
        }
    }

    fn latency(&self) -> usize {
        match self {
            Self::SingleQueue(engine) => engine.latency(),
            Self::MultiQueue(engine) => engine.latency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        assert!(ShiftDecimatorError::Poisoned.is_fatal());
        assert!(ShiftDecimatorError::Gpu(GpuError::DeviceLost).is_fatal());
        assert!(!ShiftDecimatorError::EmptyBlock.is_fatal());
        assert!(!ShiftDecimatorError::from(TapsError::Empty).is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = ShiftDecimatorError::Misaligned {
            count: 100,
            multiple: 128,
        };
        assert_eq!(err.to_string(), "Sample count 100 is not a multiple of 128");
    }
}
