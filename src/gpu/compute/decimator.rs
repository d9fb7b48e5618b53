//! Half-band decimate-by-2 stage.

use std::sync::Arc;

use super::params::DecimatePushConstants;
use super::pipeline::ComputePipeline;
use crate::gpu::buffer::Buffer;
use crate::gpu::context::{Context, GpuError};
use crate::gpu::recording::Recording;
use crate::gpu::shaders;

/// Buffers a decimator stage reads from and writes to.
pub struct DecimatorBindings<'a> {
    /// Filter coefficients, `num_taps` floats.
    pub taps: &'a Buffer,
    pub num_taps: u32,
    /// Ring buffer: `num_taps - 1` history samples followed by the block.
    pub input: &'a Buffer,
    pub output: &'a Buffer,
    /// First output sample inside `output`, in complex samples.
    pub output_offset: u32,
}

/// FIR filter followed by decimation by 2.
///
/// Output `k` is `sum(taps[j] * input[2k + num_taps - 1 - j])`, so `K` outputs
/// consume `2K + num_taps - 1` input samples.
pub struct Decimator {
    pipeline: ComputePipeline,
    stage: u32,
    num_taps: u32,
    output_offset: u32,
}

impl Decimator {
    pub const BINDING_COUNT: u32 = 3;

    pub fn new(
        context: &Arc<Context>,
        workgroup_size: u32,
        stage: u32,
        bindings: DecimatorBindings<'_>,
    ) -> Result<Self, GpuError> {
        let pipeline = ComputePipeline::new(
            context,
            shaders::DECIMATOR,
            workgroup_size,
            Self::BINDING_COUNT,
            Some(std::mem::size_of::<DecimatePushConstants>() as u32),
        )?;
        pipeline.bind_buffers(&[(0, bindings.taps), (1, bindings.input)]);

        let mut decimator = Self {
            pipeline,
            stage,
            num_taps: bindings.num_taps,
            output_offset: 0,
        };
        decimator.set_output(bindings.output, bindings.output_offset);
        Ok(decimator)
    }

    /// Redirect output to another buffer.
    ///
    /// Must not be called while a submitted command buffer uses this stage.
    pub fn set_output(&mut self, output: &Buffer, offset: u32) {
        self.pipeline.bind_buffers(&[(2, output)]);
        self.output_offset = offset;
    }

    pub fn stage(&self) -> u32 {
        self.stage
    }

    pub fn record(&self, recording: &Recording<'_>, output_count: usize) {
        let push = DecimatePushConstants {
            num_taps: self.num_taps,
            output_offset: self.output_offset,
            count: output_count as u32,
            stage: self.stage,
        };
        self.pipeline.record_dispatch(recording, &push, output_count);
    }
}
