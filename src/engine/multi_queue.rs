//! Double buffering across two compute queues.
//!
//! Slot `i` submits to queue `i` as three batches in one submission:
//!
//! 1. shift the block in the slot's staging buffer,
//! 2. append it to ring buffer 0 and run decimator 0 into the slot's hand-off buffer,
//! 3. append the hand-off samples to ring buffer 1 and run the remaining decimators.
//!
//! Batch 2 touches only ring buffer 0 and batch 3 only ring buffers 1 and up,
//! so chaining each batch after the same batch of the other slot with a
//! semaphore keeps every ring history in call order while the two queues
//! overlap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;

use super::config::ShiftDecimatorConfig;
use super::counters::{PerfCounters, PerfReport, StageTimer};
use super::layout::BlockLayout;
use super::resources::{self, FilterBank, SlotBuffers};
use super::slots::SlotPair;
use super::{ShiftDecimate, ShiftDecimatorError};
use crate::dsp::Taps;
use crate::gpu::{CommandBuffer, Context, Decimator, Fence, GpuError, Semaphore, Shifter};

const STAGE_NAMES: [&str; 3] = ["shift", "decimate-0", "decimate-rest"];
const FENCE_NAMES: [&str; 1] = ["output"];

struct Slot {
    queue: usize,
    buffers: SlotBuffers,
    shifter: Shifter,
    decimators: Vec<Decimator>,
    command_buffers: [CommandBuffer; 3],
    /// Signaled by batches 2 and 3; waited on by the same batches of the other slot.
    chain: [Semaphore; 2],
    fence: Fence,
    submitted: Option<usize>,
    recorded_for: Option<usize>,
}

impl Slot {
    fn new(context: &Arc<Context>, bank: &FilterBank, queue: usize) -> Result<Self, GpuError> {
        let layout = bank.layout();
        let buffers = SlotBuffers::new(context, layout, layout.stage_count() > 1)?;
        let shifter = Shifter::new(
            context,
            layout.workgroup_size(),
            &buffers.params,
            &buffers.staging,
            0,
        )?;

        let mut decimators = Vec::with_capacity(layout.stage_count());
        let first_output = buffers.handoff.as_ref().unwrap_or(&buffers.output);
        decimators.push(bank.decimator(context, 0, first_output, 0)?);
        for stage in 1..layout.stage_count() {
            let (output, offset) = bank.chained_output(stage, &buffers.output);
            decimators.push(bank.decimator(context, stage, output, offset)?);
        }

        Ok(Self {
            queue,
            buffers,
            shifter,
            decimators,
            command_buffers: [
                context.create_command_buffer()?,
                context.create_command_buffer()?,
                context.create_command_buffer()?,
            ],
            chain: [context.create_semaphore()?, context.create_semaphore()?],
            fence: context.create_fence(true)?,
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
            self.shifter.record(recording, block);
            if let Some(timer) = timer {
                timer.end(recording, index, 0);
            }
        })?;

        context.record(&self.command_buffers[1], |recording| {
            recording.stage_barrier();
            if let Some(timer) = timer {
                timer.begin(recording, index, 1);
            }
            bank.record_fill(recording, &self.buffers.staging, 0, block);
            recording.stage_barrier();
            bank.record_decimate(recording, &self.decimators[0], block);
            if let Some(timer) = timer {
                timer.end(recording, index, 1);
            }
        })?;

        context.record(&self.command_buffers[2], |recording| {
            recording.stage_barrier();
            if let Some(timer) = timer {
                timer.begin(recording, index, 2);
            }
            if let Some(handoff) = &self.buffers.handoff {
                bank.record_fill(recording, handoff, 1, block / 2);
                recording.stage_barrier();
                for decimator in &self.decimators[1..] {
                    bank.record_decimate(recording, decimator, block);
                }
            }
            recording.host_read_barrier();
            if let Some(timer) = timer {
                timer.end(recording, index, 2);
            }
        })
    }

    /// Submit all three batches, chaining batches 2 and 3 after `previous`.
    fn submit(&self, context: &Context, previous: Option<&Slot>) -> Result<(), GpuError> {
        let command_buffers = self.command_buffers.each_ref().map(|cb| [cb.raw()]);
        let signals = self.chain.each_ref().map(|semaphore| [semaphore.raw()]);
        let waits = previous.map(|slot| slot.chain.each_ref().map(|semaphore| [semaphore.raw()]));
        let wait_stages = [vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER];

        let mut chained = [
            vk::SubmitInfo::default()
                .command_buffers(&command_buffers[1])
                .signal_semaphores(&signals[0]),
            vk::SubmitInfo::default()
                .command_buffers(&command_buffers[2])
                .signal_semaphores(&signals[1]),
        ];
        if let Some(waits) = &waits {
            for (submit, wait) in chained.iter_mut().zip(waits) {
                *submit = submit.wait_semaphores(wait).wait_dst_stage_mask(&wait_stages);
            }
        }
        let [decimate_first, decimate_rest] = chained;
        let submits = [
            vk::SubmitInfo::default().command_buffers(&command_buffers[0]),
            decimate_first,
            decimate_rest,
        ];
        context.submit(self.queue, &submits, Some(&self.fence))
    }
}

/// Shift-decimator that alternates slots between two compute queues.
pub struct MultiQueueShiftDecimator {
    slots: SlotPair<Slot>,
    bank: FilterBank,
    timer: Option<StageTimer>,
    counters: Option<PerfCounters>,
    fence_timeout: Option<Duration>,
    poisoned: bool,
    context: Arc<Context>,
}

impl MultiQueueShiftDecimator {
    pub const NAME: &'static str = "multi-queue";

    /// Fails with `InvalidConfig` when the context has fewer than two queues.
    pub fn new(
        context: &Arc<Context>,
        taps: Taps,
        config: &ShiftDecimatorConfig,
    ) -> Result<Self, ShiftDecimatorError> {
        if context.queue_count() < 2 {
            return Err(ShiftDecimatorError::InvalidConfig(format!(
                "{} scheduling needs 2 compute queues, the context has {}",
                Self::NAME,
                context.queue_count()
            )));
        }
        config.validate(&taps)?;
        let layout = BlockLayout::new(&taps, config.workgroup_size, config.max_block_size);
        let bank = FilterBank::new(context, &taps, layout)?;
        let slots = SlotPair::try_from_fn(|index| Slot::new(context, &bank, index))?;
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

        // submitted two calls ago and already read back
        context.wait_for_fence(&current.fence, timeout)?;
        current.buffers.upload(&samples[..2 * count], phi, omega)?;
        if current.recorded_for != Some(count) {
            current.recorded_for = None;
            current.record(context, bank, timer, current_index, count)?;
            current.recorded_for = Some(count);
        }
        context.reset_fence(&current.fence)?;
        current.submit(context, other.submitted.map(|_| &*other))?;
        current.submitted = Some(count);

        let fence_wait = resources::wait_timed(context, &other.fence, timeout)?;
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

        if let Some(counters) = &mut self.counters {
            if let Some(times) = &stage_times {
                counters.record_stages(times);
            }
            counters.record_fence_wait(0, fence_wait);
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

impl ShiftDecimate for MultiQueueShiftDecimator {
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

impl Drop for MultiQueueShiftDecimator {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if let Err(err) = self.context.queue_wait_idle(slot.queue) {
                log::warn!(
                    "Failed to drain queue {} before releasing {}: {err}",
                    slot.queue,
                    Self::NAME
                );
            }
        }
    }
}
