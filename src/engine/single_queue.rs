//! Double buffering on one compute queue.
//!
//! Each slot records two command buffers: the upload copy, shift and first
//! decimator, then the remaining decimators. Stage 1 of the current block is
//! submitted before the previous block is read back, so the GPU starts on new
//! input while the host waits for old output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::ShiftDecimatorConfig;
use super::counters::{PerfCounters, PerfReport, StageTimer};
use super::layout::BlockLayout;
use super::resources::{self, FilterBank, SlotBuffers};
use super::slots::SlotPair;
use super::{ShiftDecimate, ShiftDecimatorError};
use crate::dsp::Taps;
use crate::gpu::{CommandBuffer, Context, Decimator, Fence, GpuError, Shifter};

const QUEUE: usize = 0;
const STAGE_NAMES: [&str; 2] = ["shift+decimate-0", "decimate-rest"];
const FENCE_NAMES: [&str; 2] = ["stage-1", "stage-2"];

struct Slot {
    buffers: SlotBuffers,
    shifter: Shifter,
    decimators: Vec<Decimator>,
    command_buffers: [CommandBuffer; 2],
    fences: [Fence; 2],
    /// Block size of the last submission.
    submitted: Option<usize>,
    /// Block size the command buffers were recorded for.
    recorded_for: Option<usize>,
}

impl Slot {
    fn new(context: &Arc<Context>, bank: &FilterBank) -> Result<Self, GpuError> {
        let layout = bank.layout();
        let buffers = SlotBuffers::new(context, layout, false)?;
        let shifter = Shifter::new(
            context,
            layout.workgroup_size(),
            &buffers.params,
            bank.ring(0),
            layout.history_len(0) as u32,
        )?;
        let decimators = (0..layout.stage_count())
            .map(|stage| {
                let (output, offset) = bank.chained_output(stage, &buffers.output);
                bank.decimator(context, stage, output, offset)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            buffers,
            shifter,
            decimators,
            command_buffers: [context.create_command_buffer()?, context.create_command_buffer()?],
            fences: [context.create_fence(true)?, context.create_fence(true)?],
            submitted: None,
            recorded_for: None,
        })
    }

    fn record(
        &self,
        context: &Context,
        bank: &FilterBank,
        timer: Option<&StageTimer>,
        index: usize,
        block: usize,
    ) -> Result<(), GpuError> {
        context.record(&self.command_buffers[0], |recording| {
            recording.stage_barrier();
            if let Some(timer) = timer {
                timer.reset(recording, index);
                timer.begin(recording, index, 0);
            }
            bank.record_fill(recording, &self.buffers.staging, 0, block);
            recording.stage_barrier();
            self.shifter.record(recording, block);
            recording.stage_barrier();
            bank.record_decimate(recording, &self.decimators[0], block);
            if let Some(timer) = timer {
                timer.end(recording, index, 0);
            }
        })?;

        context.record(&self.command_buffers[1], |recording| {
            recording.stage_barrier();
            if let Some(timer) = timer {
                timer.begin(recording, index, 1);
            }
            for decimator in &self.decimators[1..] {
                bank.record_decimate(recording, decimator, block);
            }
            recording.host_read_barrier();
            if let Some(timer) = timer {
                timer.end(recording, index, 1);
            }
        })
    }
}

/// Shift-decimator that runs both slots on queue 0.
pub struct SingleQueueShiftDecimator {
    slots: SlotPair<Slot>,
    bank: FilterBank,
    timer: Option<StageTimer>,
    counters: Option<PerfCounters>,
    fence_timeout: Option<Duration>,
    poisoned: bool,
    context: Arc<Context>,
}

impl SingleQueueShiftDecimator {
    pub const NAME: &'static str = "single-queue";

    pub fn new(
        context: &Arc<Context>,
        taps: Taps,
        config: &ShiftDecimatorConfig,
    ) -> Result<Self, ShiftDecimatorError> {
        config.validate(&taps)?;
        let layout = BlockLayout::new(&taps, config.workgroup_size, config.max_block_size);
        let bank = FilterBank::new(context, &taps, layout)?;
        let slots = SlotPair::try_from_fn(|_| Slot::new(context, &bank))?;
        resources::zero_fill(
            context,
            bank.rings()
                .iter()
                .chain(slots.iter().flat_map(|slot| slot.buffers.buffers())),
            config.fence_timeout(),
        )?;

        let timer = if config.perf_counters {
            StageTimer::lease(context, STAGE_NAMES.len() as u32)
        } else {
            None
        };
        let counters = config
            .perf_counters
            .then(|| PerfCounters::new(Self::NAME, &STAGE_NAMES, &FENCE_NAMES, config.counter_window));

        log::info!(
            "Created {} shift-decimator: {} stages, taps {:?}, max block {}, GPU timestamps {}",
            Self::NAME,
            taps.stage_count(),
            taps.stages().iter().map(Vec::len).collect::<Vec<_>>(),
            config.max_block_size,
            if timer.is_some() { "on" } else { "off" },
        );

        Ok(Self {
            slots,
            bank,
            timer,
            counters,
            fence_timeout: config.fence_timeout(),
            poisoned: false,
            context: Arc::clone(context),
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn layout(&self) -> &BlockLayout {
        self.bank.layout()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Samples the next call returns if it supplies `sample_count` samples.
    pub fn pending_output_len(&self, sample_count: usize) -> usize {
        let previous = self.slots.other().submitted.unwrap_or(sample_count);
        self.bank.layout().output_len(previous)
    }

    pub fn perf_report(&self) -> Option<&PerfReport> {
        self.counters.as_ref()?.last_report()
    }

    fn run(&mut self, samples: &mut [f32], count: usize, phi: f32, omega: f32) -> Result<usize, GpuError> {
        let started = Instant::now();
        let timeout = self.fence_timeout;
        let context = &self.context;
        let bank = &self.bank;
        let timer = self.timer.as_ref();
        let current_index = self.slots.current_index();
        let other_index = self.slots.other_index();
        let (current, other) = self.slots.split_mut();

        let stage_one_wait = resources::wait_timed(context, &other.fences[0], timeout)?;
        // submitted two calls ago and already read back
        for fence in &current.fences {
            context.wait_for_fence(fence, timeout)?;
        }

        current.buffers.upload(&samples[..2 * count], phi, omega)?;
        if current.recorded_for != Some(count) {
            current.recorded_for = None;
            current.record(context, bank, timer, current_index, count)?;
            current.recorded_for = Some(count);
        }
        context.reset_fence(&current.fences[0])?;
        resources::submit_alone(context, QUEUE, &current.command_buffers[0], &current.fences[0])?;

        let stage_two_wait = resources::wait_timed(context, &other.fences[1], timeout)?;
        let layout = bank.layout();
        let returned = match other.submitted {
            Some(previous) => {
                let len = layout.output_len(previous);
                other.buffers.read_output(&mut samples[..2 * len])?;
                len
            }
            None => {
                let len = layout.output_len(count);
                samples[..2 * len].fill(0.0);
                len
            }
        };
        let stage_times = other
            .submitted
            .and_then(|_| timer.and_then(|timer| timer.read(other_index)));

        context.reset_fence(&current.fences[1])?;
        resources::submit_alone(context, QUEUE, &current.command_buffers[1], &current.fences[1])?;
        current.submitted = Some(count);

        if let Some(counters) = &mut self.counters {
            if let Some(times) = &stage_times {
                counters.record_stages(times);
            }
            counters.record_fence_wait(0, stage_one_wait);
            counters.record_fence_wait(1, stage_two_wait);
            counters.finish_call(started.elapsed());
        }
        self.slots.swap();
        Ok(returned)
    }

    fn poison(&mut self, err: GpuError) -> ShiftDecimatorError {
        log::error!("{} shift-decimator failed, refusing further calls: {err}", Self::NAME);
        self.poisoned = true;
        err.into()
    }
}

impl ShiftDecimate for SingleQueueShiftDecimator {
    fn process(
        &mut self,
        samples: &mut [f32],
        sample_count: usize,
        phi: f32,
        omega: f32,
    ) -> Result<usize, ShiftDecimatorError> {
        if self.poisoned {
            return Err(ShiftDecimatorError::Poisoned);
        }
        let layout = self.bank.layout();
        layout.validate(sample_count)?;
        layout.check_buffer(samples.len(), sample_count, self.pending_output_len(sample_count))?;

        self.run(samples, sample_count, phi, omega)
            .map_err(|err| self.poison(err))
    }

    fn stage_count(&self) -> usize {
        self.bank.layout().stage_count()
    }

    fn latency(&self) -> usize {
        1
    }
}

impl Drop for SingleQueueShiftDecimator {
    fn drop(&mut self) {
        if let Err(err) = self.context.queue_wait_idle(QUEUE) {
            log::warn!("Failed to drain queue {QUEUE} before releasing {}: {err}", Self::NAME);
        }
    }
}
