//! Device buffers and recording helpers shared by both scheduling strategies.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;

use super::layout::{sample_bytes, BlockLayout};
use crate::dsp::Taps;
use crate::gpu::compute::ShiftParams;
use crate::gpu::{
    Buffer, CommandBuffer, Context, Decimator, DecimatorBindings, Fence, GpuError, MemoryUsage,
    Recording,
};

/// Taps and ring buffers, one per stage, shared by both slots.
pub(crate) struct FilterBank {
    layout: BlockLayout,
    taps: Vec<Buffer>,
    rings: Vec<Buffer>,
}

impl FilterBank {
    pub fn new(context: &Arc<Context>, taps: &Taps, layout: BlockLayout) -> Result<Self, GpuError> {
        let taps = taps
            .stages()
            .iter()
            .map(|coefficients| {
                let mut buffer = Buffer::new(
                    context,
                    std::mem::size_of_val(coefficients.as_slice()) as u64,
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                    MemoryUsage::Upload,
                )?;
                buffer.copy_from(coefficients.as_slice(), 0)?;
                Ok(buffer)
            })
            .collect::<Result<Vec<_>, GpuError>>()?;

        let rings = (0..layout.stage_count())
            .map(|stage| {
                Buffer::new(
                    context,
                    sample_bytes(layout.ring_capacity(stage)),
                    vk::BufferUsageFlags::STORAGE_BUFFER
                        | vk::BufferUsageFlags::TRANSFER_SRC
                        | vk::BufferUsageFlags::TRANSFER_DST,
                    MemoryUsage::DeviceLocal,
                )
            })
            .collect::<Result<Vec<_>, GpuError>>()?;

        Ok(Self {
            layout,
            taps,
            rings,
        })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn ring(&self, stage: usize) -> &Buffer {
        &self.rings[stage]
    }

    pub fn rings(&self) -> &[Buffer] {
        &self.rings
    }

    /// Decimator reading `stage`'s ring buffer and writing `output` from sample `output_offset`.
    pub fn decimator(
        &self,
        context: &Arc<Context>,
        stage: usize,
        output: &Buffer,
        output_offset: usize,
    ) -> Result<Decimator, GpuError> {
        Decimator::new(
            context,
            self.layout.workgroup_size(),
            stage as u32,
            DecimatorBindings {
                taps: &self.taps[stage],
                num_taps: (self.layout.history_len(stage) + 1) as u32,
                input: &self.rings[stage],
                output,
                output_offset: output_offset as u32,
            },
        )
    }

    /// Where decimator `stage` writes when the cascade runs straight through:
    /// behind the next ring's history, or the slot output for the last stage.
    pub fn chained_output<'a>(&'a self, stage: usize, slot_output: &'a Buffer) -> (&'a Buffer, usize) {
        if stage + 1 < self.layout.stage_count() {
            (&self.rings[stage + 1], self.layout.history_len(stage + 1))
        } else {
            (slot_output, 0)
        }
    }

    /// Copy `count` samples from `src` to just behind `stage`'s history.
    pub fn record_fill(&self, recording: &Recording<'_>, src: &Buffer, stage: usize, count: usize) {
        recording.copy_buffer(
            src,
            0,
            &self.rings[stage],
            sample_bytes(self.layout.history_len(stage)),
            sample_bytes(count),
        );
    }

    /// Dispatch decimator `stage` for a block of `block` samples, then move the
    /// tail of its input window to the front of the ring buffer.
    pub fn record_decimate(&self, recording: &Recording<'_>, decimator: &Decimator, block: usize) {
        let stage = decimator.stage() as usize;
        let input = self.layout.stage_input(block, stage);
        let history = self.layout.history_len(stage);
        let ring = &self.rings[stage];

        decimator.record(recording, input / 2);
        recording.stage_barrier();
        recording.copy_buffer(ring, sample_bytes(input), ring, 0, sample_bytes(history));
    }
}

/// Host-visible buffers owned by one slot.
pub(crate) struct SlotBuffers {
    pub params: Buffer,
    pub staging: Buffer,
    pub output: Buffer,
    /// Decimator 0 output when stage 0 and the later stages run in separate batches.
    pub handoff: Option<Buffer>,
}

impl SlotBuffers {
    pub fn new(context: &Arc<Context>, layout: &BlockLayout, handoff: bool) -> Result<Self, GpuError> {
        let max = layout.max_block_size();
        let mut params = Buffer::new(
            context,
            std::mem::size_of::<ShiftParams>() as u64,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::Upload,
        )?;
        params.map_persistent()?;

        let mut staging = Buffer::new(
            context,
            sample_bytes(max),
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::Upload,
        )?;
        staging.map_persistent()?;

        let mut output = Buffer::new(
            context,
            sample_bytes(layout.output_len(max)),
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::Readback,
        )?;
        output.map_persistent()?;

        let handoff = if handoff {
            Some(Buffer::new(
                context,
                sample_bytes(max >> 1),
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryUsage::DeviceLocal,
            )?)
        } else {
            None
        };

        Ok(Self {
            params,
            staging,
            output,
            handoff,
        })
    }

    /// Write the block and its shift parameters. The slot must be idle.
    pub fn upload(&mut self, samples: &[f32], phi: f32, omega: f32) -> Result<(), GpuError> {
        self.params.copy_from(&[ShiftParams::new(phi, omega)], 0)?;
        self.staging.copy_from(samples, 0)
    }

    /// Read back the interleaved output. The slot's last submission must be complete.
    pub fn read_output(&mut self, samples: &mut [f32]) -> Result<(), GpuError> {
        self.output.copy_to(samples, 0)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        [&self.params, &self.staging, &self.output]
            .into_iter()
            .chain(self.handoff.as_ref())
    }
}

/// Zero every buffer on queue 0 and wait up to `timeout` for completion.
pub(crate) fn zero_fill<'a>(
    context: &Arc<Context>,
    buffers: impl IntoIterator<Item = &'a Buffer>,
    timeout: Option<Duration>,
) -> Result<(), GpuError> {
    let buffers: Vec<&Buffer> = buffers.into_iter().collect();
    context.run_one_shot(0, timeout, |recording| {
        recording.stage_barrier();
        for buffer in &buffers {
            recording.fill_buffer(buffer, 0);
        }
        recording.host_read_barrier();
    })
}

/// Submit one command buffer that signals `fence`.
pub(crate) fn submit_alone(
    context: &Context,
    queue_index: usize,
    command_buffer: &CommandBuffer,
    fence: &Fence,
) -> Result<(), GpuError> {
    let command_buffers = [command_buffer.raw()];
    let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
    context.submit(queue_index, &[submit], Some(fence))
}

/// Wait for `fence`, returning how long the host blocked.
pub(crate) fn wait_timed(
    context: &Context,
    fence: &Fence,
    timeout: Option<Duration>,
) -> Result<Duration, GpuError> {
    let start = Instant::now();
    context.wait_for_fence(fence, timeout)?;
    Ok(start.elapsed())
}
