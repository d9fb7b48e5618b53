//! In-place frequency shift stage.

use std::sync::Arc;

use super::params::ShiftPushConstants;
use super::pipeline::ComputePipeline;
use crate::gpu::buffer::Buffer;
use crate::gpu::context::{Context, GpuError};
use crate::gpu::recording::Recording;
use crate::gpu::shaders;

/// Rotates each complex sample by `phi + omega * n`.
///
/// Binding 0 holds [`ShiftParams`](super::params::ShiftParams); binding 1 is
/// the sample buffer, shifted in place starting at `offset`.
pub struct Shifter {
    pipeline: ComputePipeline,
    offset: u32,
}

impl Shifter {
    pub const BINDING_COUNT: u32 = 2;

    pub fn new(
        context: &Arc<Context>,
        workgroup_size: u32,
        params: &Buffer,
        samples: &Buffer,
        offset: u32,
    ) -> Result<Self, GpuError> {
        let pipeline = ComputePipeline::new(
            context,
            shaders::SHIFTER,
            workgroup_size,
            Self::BINDING_COUNT,
            Some(std::mem::size_of::<ShiftPushConstants>() as u32),
        )?;
        pipeline.bind_buffers(&[(0, params), (1, samples)]);
        Ok(Self { pipeline, offset })
    }

    pub fn record(&self, recording: &Recording<'_>, sample_count: usize) {
        let push = ShiftPushConstants {
            offset: self.offset,
            count: sample_count as u32,
        };
        self.pipeline.record_dispatch(recording, &push, sample_count);
    }
}
