//! Shared scaffolding for a named compute shader with storage-buffer bindings.

use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::gpu::buffer::Buffer;
use crate::gpu::context::{Context, GpuError, VkResultExt};
use crate::gpu::handle::{DescriptorSet, DeviceHandle};
use crate::gpu::recording::Recording;
use crate::gpu::shaders;

/// Descriptor set layout, pipeline layout and pipeline for one compute shader.
///
/// Bindings `0..binding_count` are storage buffers visible to the compute stage.
pub struct ComputePipeline {
    pipeline: DeviceHandle<vk::Pipeline>,
    pipeline_layout: DeviceHandle<vk::PipelineLayout>,
    descriptor_set: DescriptorSet,
    _descriptor_set_layout: DeviceHandle<vk::DescriptorSetLayout>,
    context: Arc<Context>,
    workgroup_size: u32,
    push_constant_size: u32,
}

impl ComputePipeline {
    pub fn new(
        context: &Arc<Context>,
        shader: &'static str,
        workgroup_size: u32,
        binding_count: u32,
        push_constant_size: Option<u32>,
    ) -> Result<Self, GpuError> {
        let (descriptor_set_layout, descriptor_set) =
            create_descriptor_set(context, binding_count)?;
        let (pipeline_layout, pipeline) = create_compute_pipeline(
            context,
            shader,
            workgroup_size,
            descriptor_set_layout.raw(),
            push_constant_size,
        )?;

        Ok(Self {
            pipeline,
            pipeline_layout,
            descriptor_set,
            _descriptor_set_layout: descriptor_set_layout,
            context: Arc::clone(context),
            workgroup_size,
            push_constant_size: push_constant_size.unwrap_or(0),
        })
    }

    /// Point storage-buffer bindings at buffers.
    ///
    /// Must not be called while a submitted command buffer uses this pipeline.
    pub fn bind_buffers(&self, bindings: &[(u32, &Buffer)]) {
        let infos: Vec<[vk::DescriptorBufferInfo; 1]> =
            bindings.iter().map(|(_, buffer)| [buffer.descriptor()]).collect();
        let writes: Vec<vk::WriteDescriptorSet<'_>> = bindings
            .iter()
            .zip(&infos)
            .map(|((binding, _), info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(self.descriptor_set.raw())
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
            })
            .collect();
        unsafe { self.context.device().update_descriptor_sets(&writes, &[]) };
    }

    /// Record a dispatch covering `invocations` shader invocations.
    pub fn record_dispatch<P: Pod>(&self, recording: &Recording<'_>, push: &P, invocations: usize) {
        let device = recording.device();
        let command_buffer = recording.raw();
        let groups = (invocations as u32).div_ceil(self.workgroup_size);
        unsafe {
            device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline.raw(),
            );
            if self.push_constant_size > 0 {
                device.cmd_push_constants(
                    command_buffer,
                    self.pipeline_layout.raw(),
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    bytemuck::bytes_of(push),
                );
            }
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout.raw(),
                0,
                &[self.descriptor_set.raw()],
                &[],
            );
            device.cmd_dispatch(command_buffer, groups, 1, 1);
        }
    }
}

fn create_descriptor_set(
    context: &Arc<Context>,
    binding_count: u32,
) -> Result<(DeviceHandle<vk::DescriptorSetLayout>, DescriptorSet), GpuError> {
    let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = (0..binding_count)
        .map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
        })
        .collect();
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
    let layout = unsafe {
        let raw = context
            .device()
            .create_descriptor_set_layout(&info, None)
            .vk("vkCreateDescriptorSetLayout")?;
        DeviceHandle::from_raw(context, raw)
    };
    let set = context.allocate_descriptor_set(layout.raw())?;
    Ok((layout, set))
}

fn create_compute_pipeline(
    context: &Arc<Context>,
    shader: &'static str,
    workgroup_size: u32,
    descriptor_set_layout: vk::DescriptorSetLayout,
    push_constant_size: Option<u32>,
) -> Result<(DeviceHandle<vk::PipelineLayout>, DeviceHandle<vk::Pipeline>), GpuError> {
    let device = context.device();
    let module = context.create_shader_module(shader, workgroup_size)?;

    let set_layouts = [descriptor_set_layout];
    let push_ranges: Vec<vk::PushConstantRange> = push_constant_size
        .map(|size| {
            vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(size)
        })
        .into_iter()
        .collect();
    let layout_info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges);
    let pipeline_layout = unsafe {
        let raw = device
            .create_pipeline_layout(&layout_info, None)
            .vk("vkCreatePipelineLayout")?;
        DeviceHandle::from_raw(context, raw)
    };

    // Constant 0 carries the workgroup size for precompiled shaders.
    let spec_entries = [vk::SpecializationMapEntry::default()
        .constant_id(0)
        .offset(0)
        .size(std::mem::size_of::<u32>())];
    let spec_data = workgroup_size.to_ne_bytes();
    let specialization = vk::SpecializationInfo::default()
        .map_entries(&spec_entries)
        .data(&spec_data);
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module.raw())
        .name(shaders::ENTRY_POINT)
        .specialization_info(&specialization);
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(pipeline_layout.raw());

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, result)| result)
    .vk("vkCreateComputePipelines")?;
    let pipeline = pipelines
        .into_iter()
        .next()
        .ok_or(GpuError::Vulkan {
            call: "vkCreateComputePipelines",
            result: vk::Result::ERROR_UNKNOWN,
        })?;

    Ok((pipeline_layout, unsafe { DeviceHandle::from_raw(context, pipeline) }))
}
