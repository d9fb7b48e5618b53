//! Command recording helpers.

use ash::vk;

use super::buffer::Buffer;
use super::context::Context;

/// A command buffer between `vkBeginCommandBuffer` and `vkEndCommandBuffer`.
///
/// Only handed out by [`Context::record`], which holds the command pool lock
/// for the lifetime of the recording.
pub struct Recording<'a> {
    context: &'a Context,
    command_buffer: vk::CommandBuffer,
}

impl<'a> Recording<'a> {
    pub(crate) fn new(context: &'a Context, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            context,
            command_buffer,
        }
    }

    pub fn device(&self) -> &ash::Device {
        self.context.device()
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Order all earlier compute and transfer work before all later compute and transfer work.
    ///
    /// Recorded at the start of a command buffer, it also orders it after
    /// everything previously submitted to the same queue.
    pub fn stage_barrier(&self) {
        let stages = vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER;
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(
                vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::SHADER_WRITE
                    | vk::AccessFlags::TRANSFER_READ
                    | vk::AccessFlags::TRANSFER_WRITE,
            );
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.command_buffer,
                stages,
                stages,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    /// Make compute and transfer writes visible to host reads after the fence signals.
    pub fn host_read_barrier(&self) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE | vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        unsafe {
            self.device().cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    /// Copy `size` bytes between buffers. Source and destination ranges must not overlap.
    pub fn copy_buffer(&self, src: &Buffer, src_offset: u64, dst: &Buffer, dst_offset: u64, size: u64) {
        debug_assert!(src_offset + size <= src.size() && dst_offset + size <= dst.size());
        if size == 0 {
            return;
        }
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device()
                .cmd_copy_buffer(self.command_buffer, src.raw(), dst.raw(), &[region]);
        }
    }

    /// Fill a whole buffer with a repeated 32-bit word.
    pub fn fill_buffer(&self, buffer: &Buffer, word: u32) {
        unsafe {
            self.device().cmd_fill_buffer(
                self.command_buffer,
                buffer.raw(),
                0,
                vk::WHOLE_SIZE,
                word,
            );
        }
    }
}
