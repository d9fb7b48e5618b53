//! Owning wrappers for Vulkan objects created from a [`Context`].
//!
//! Every wrapper keeps an `Arc<Context>`, so the device and its pools outlive
//! the objects allocated from them. Each object is released exactly once when
//! its wrapper is dropped.

use std::fmt;
use std::sync::Arc;

use ash::vk;

use super::context::Context;

/// A Vulkan object released by a single device-level destroy call.
pub trait DeviceObject: Copy + fmt::Debug {
    /// Destroy the object.
    ///
    /// # Safety
    /// The handle must have been created from `device` and must no longer be
    /// referenced by pending GPU work.
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceObject for $ty {
                unsafe fn destroy(self, device: &ash::Device) {
                    device.$destroy(self, None);
                }
            }
        )*
    };
}

device_object! {
    vk::Buffer => destroy_buffer,
    vk::DeviceMemory => free_memory,
    vk::Fence => destroy_fence,
    vk::Semaphore => destroy_semaphore,
    vk::ShaderModule => destroy_shader_module,
    vk::Pipeline => destroy_pipeline,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
}

/// Exclusive owner of one Vulkan object.
pub struct DeviceHandle<T: DeviceObject> {
    handle: T,
    context: Arc<Context>,
}

impl<T: DeviceObject> DeviceHandle<T> {
    /// Take ownership of a raw handle.
    ///
    /// # Safety
    /// `handle` must be a live object created from `context`'s device and must
    /// not be owned by anything else.
    pub(crate) unsafe fn from_raw(context: &Arc<Context>, handle: T) -> Self {
        Self {
            handle,
            context: Arc::clone(context),
        }
    }

    pub fn raw(&self) -> T {
        self.handle
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }
}

impl<T: DeviceObject> Drop for DeviceHandle<T> {
    fn drop(&mut self) {
        unsafe { self.handle.destroy(self.context.device()) }
    }
}

impl<T: DeviceObject> fmt::Debug for DeviceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceHandle").field(&self.handle).finish()
    }
}

pub type Fence = DeviceHandle<vk::Fence>;
pub type Semaphore = DeviceHandle<vk::Semaphore>;
pub type ShaderModule = DeviceHandle<vk::ShaderModule>;

/// Primary command buffer allocated from the context's command pool.
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    context: Arc<Context>,
}

impl CommandBuffer {
    pub(crate) fn new(context: &Arc<Context>, handle: vk::CommandBuffer) -> Self {
        Self {
            handle,
            context: Arc::clone(context),
        }
    }

    pub fn raw(&self) -> vk::CommandBuffer {
        self.handle
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.context.free_command_buffer(self.handle);
    }
}

/// Descriptor set allocated from the context's descriptor pool.
pub struct DescriptorSet {
    handle: vk::DescriptorSet,
    context: Arc<Context>,
}

impl DescriptorSet {
    pub(crate) fn new(context: &Arc<Context>, handle: vk::DescriptorSet) -> Self {
        Self {
            handle,
            context: Arc::clone(context),
        }
    }

    pub fn raw(&self) -> vk::DescriptorSet {
        self.handle
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.context.free_descriptor_set(self.handle);
    }
}
