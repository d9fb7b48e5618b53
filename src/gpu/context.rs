//! Vulkan context initialization and management.
//!
//! A [`Context`] owns the instance, the logical device with up to two compute
//! queues, and the long-lived pools every engine allocates from. Several
//! engines may share one context, from different threads if needed.

use std::borrow::Cow;
use std::ffi::{c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LockResult, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ash::vk;
use serde::{Deserialize, Serialize};

use super::compute::{Decimator, Shifter};
use super::handle::{CommandBuffer, DescriptorSet, DeviceHandle, Fence, Semaphore, ShaderModule};
use super::query::TimestampQueries;
use super::recording::Recording;
use super::shaders;
use crate::dsp::MAX_STAGES;

/// Upper bound on compute queues opened from the selected family.
pub const MAX_QUEUES: u32 = 2;

/// Number of timestamp queries in the context's query pool.
pub const QUERY_POOL_SIZE: u32 = 32;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Errors that can occur during GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("Failed to load Vulkan driver: {0}")]
    Loading(#[from] ash::LoadingError),
    #[error("Vulkan {required} required, driver reports {found}")]
    UnsupportedVersion { required: String, found: String },
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
    #[error("No Vulkan device with a compute queue found")]
    NoComputeDevice,
    #[error("Device index {index} out of range ({count} devices)")]
    InvalidDeviceIndex { index: usize, count: usize },
    #[error("No memory type matches bits {type_bits:#x} with {properties:?}")]
    NoMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },
    #[error("Unknown shader: {0}")]
    UnknownShader(String),
    #[error("Failed to compile shader {name}: {message}")]
    ShaderCompile { name: String, message: String },
    #[error("Failed to read shader binary: {0}")]
    Io(#[from] std::io::Error),
    #[error("Buffer access out of range: {offset}+{len} exceeds {capacity} bytes")]
    OutOfRange { offset: u64, len: u64, capacity: u64 },
    #[error("Buffer is already mapped")]
    AlreadyMapped,
    #[error("Queue index {index} out of range ({count} queues)")]
    InvalidQueue { index: usize, count: usize },
    #[error("Fence wait timed out after {0:?}, treating device as lost")]
    Timeout(Duration),
    #[error("GPU device lost")]
    DeviceLost,
}

/// Attach the failing Vulkan entry point to a raw `vk::Result`.
pub(crate) trait VkResultExt<T> {
    fn vk(self, call: &'static str) -> Result<T, GpuError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk(self, call: &'static str) -> Result<T, GpuError> {
        self.map_err(|result| match result {
            vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
            result => GpuError::Vulkan { call, result },
        })
    }
}

/// Lock a mutex whose guarded value stays consistent even if a holder panicked.
pub(crate) fn lock<T>(result: LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Context construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub application_name: String,
    /// Enable the Khronos validation layer and forward its messages to `log`.
    pub enable_validation: bool,
    /// Number of compute queues to open (clamped to 1..=2 and to what the family offers).
    pub max_queues: u32,
    /// Explicit physical device index; otherwise discrete GPUs are preferred.
    pub device_index: Option<usize>,
    /// Vulkan loader to open instead of the system default.
    pub driver_path: Option<PathBuf>,
    /// Directory with precompiled `<name>.comp.spv` shaders. Embedded WGSL is used when unset.
    pub shader_dir: Option<PathBuf>,
    /// Number of engines the descriptor pool is sized for.
    pub max_engines: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            application_name: "spectrum-gpu".to_string(),
            enable_validation: false,
            max_queues: MAX_QUEUES,
            device_index: None,
            driver_path: None,
            shader_dir: None,
            max_engines: 4,
        }
    }
}

impl ContextConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `SPECTRUM_GPU_DEVICE`, `SPECTRUM_GPU_VALIDATION` and `SPECTRUM_GPU_SHADER_DIR`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(index) = std::env::var("SPECTRUM_GPU_DEVICE")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.device_index = Some(index);
        }
        if let Ok(value) = std::env::var("SPECTRUM_GPU_VALIDATION") {
            self.enable_validation = matches!(value.trim(), "1" | "true" | "yes" | "on");
        }
        if let Ok(dir) = std::env::var("SPECTRUM_GPU_SHADER_DIR") {
            if !dir.is_empty() {
                self.shader_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }
}

/// Summary of the selected device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: String,
    pub api_version: String,
    pub queue_family_index: u32,
    pub queue_count: usize,
    /// Nanoseconds per timestamp tick, when compute timestamps are supported.
    pub timestamp_period: Option<f32>,
}

struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Instance-level objects, released after the device.
struct InstanceOwner {
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    // Keeps the loader library alive until the instance is gone.
    entry: ash::Entry,
}

impl Drop for InstanceOwner {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = self.debug.take() {
                debug
                    .loader
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Vulkan device, compute queues and shared pools.
pub struct Context {
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    non_coherent_atom_size: u64,
    info: DeviceInfo,
    queues: Vec<Mutex<vk::Queue>>,
    command_pool: Mutex<vk::CommandPool>,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    query_pool: vk::QueryPool,
    query_leases: Mutex<u32>,
    shader_dir: Option<PathBuf>,
    instance: InstanceOwner,
}

impl Context {
    /// Load the Vulkan driver and create a context.
    pub fn new(config: &ContextConfig) -> Result<Arc<Self>, GpuError> {
        let entry = match &config.driver_path {
            Some(path) => unsafe { ash::Entry::load_from(path)? },
            None => unsafe { ash::Entry::load()? },
        };
        Self::with_entry(entry, config)
    }

    /// Create a context from a driver entry point resolved by the caller.
    pub fn with_entry(entry: ash::Entry, config: &ContextConfig) -> Result<Arc<Self>, GpuError> {
        check_instance_version(&entry)?;
        let instance = create_instance(entry, config)?;
        let (physical_device, family, family_queues) =
            select_physical_device(&instance.instance, config)?;

        let properties = unsafe {
            instance
                .instance
                .get_physical_device_properties(physical_device)
        };
        let memory_properties = unsafe {
            instance
                .instance
                .get_physical_device_memory_properties(physical_device)
        };
        let family_properties = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(physical_device)
        };
        let timestamp_bits = family_properties
            .get(family as usize)
            .map_or(0, |f| f.timestamp_valid_bits);

        let queue_count = config.max_queues.clamp(1, MAX_QUEUES).min(family_queues);
        let priorities = vec![1.0f32; queue_count as usize];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(family)
            .queue_priorities(&priorities)];
        let device_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_info);
        let device = unsafe {
            instance
                .instance
                .create_device(physical_device, &device_info, None)
        }
        .vk("vkCreateDevice")?;

        let queues = (0..queue_count)
            .map(|index| Mutex::new(unsafe { device.get_device_queue(family, index) }))
            .collect::<Vec<_>>();

        let supports_timestamps = properties.limits.timestamp_period != 0.0
            && properties.limits.timestamp_compute_and_graphics == vk::TRUE
            && timestamp_bits > 0;

        let info = DeviceInfo {
            name: properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            device_type: format!("{:?}", properties.device_type),
            api_version: format_version(properties.api_version),
            queue_family_index: family,
            queue_count: queues.len(),
            timestamp_period: supports_timestamps.then_some(properties.limits.timestamp_period),
        };

        // Pools start null so a failure below releases only what exists.
        let mut context = Context {
            device,
            memory_properties,
            non_coherent_atom_size: properties.limits.non_coherent_atom_size.max(1),
            info,
            queues,
            command_pool: Mutex::new(vk::CommandPool::null()),
            descriptor_pool: Mutex::new(vk::DescriptorPool::null()),
            query_pool: vk::QueryPool::null(),
            query_leases: Mutex::new(0),
            shader_dir: config.shader_dir.clone(),
            instance,
        };
        context.create_pools(config)?;

        log::info!(
            "Vulkan device: {} ({}, Vulkan {}), {} compute queue(s), timestamps {}",
            context.info.name,
            context.info.device_type,
            context.info.api_version,
            context.info.queue_count,
            if supports_timestamps { "on" } else { "off" },
        );

        Ok(Arc::new(context))
    }

    fn create_pools(&mut self, config: &ContextConfig) -> Result<(), GpuError> {
        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.info.queue_family_index);
        *self.command_pool.get_mut().unwrap_or_else(PoisonError::into_inner) =
            unsafe { self.device.create_command_pool(&command_pool_info, None) }
                .vk("vkCreateCommandPool")?;

        // Two slots per engine, each with one shifter and up to MAX_STAGES decimators.
        let engines = config.max_engines.max(1);
        let stages = MAX_STAGES as u32;
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(
                engines * 2 * (Shifter::BINDING_COUNT + Decimator::BINDING_COUNT * stages),
            )];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(engines * 2 * (1 + stages))
            .pool_sizes(&pool_sizes);
        *self
            .descriptor_pool
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) =
            unsafe { self.device.create_descriptor_pool(&descriptor_pool_info, None) }
                .vk("vkCreateDescriptorPool")?;

        if self.info.timestamp_period.is_some() {
            let query_info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::TIMESTAMP)
                .query_count(QUERY_POOL_SIZE);
            self.query_pool = unsafe { self.device.create_query_pool(&query_info, None) }
                .vk("vkCreateQueryPool")?;
        }

        Ok(())
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn non_coherent_atom_size(&self) -> u64 {
        self.non_coherent_atom_size
    }

    pub(crate) fn shader_dir(&self) -> Option<&Path> {
        self.shader_dir.as_deref()
    }

    /// First memory type allowed by `type_bits` that has all of `properties`.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<(u32, vk::MemoryPropertyFlags)> {
        let count = self.memory_properties.memory_type_count as usize;
        self.memory_properties.memory_types[..count]
            .iter()
            .enumerate()
            .find(|(index, memory_type)| {
                type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
            })
            .map(|(index, memory_type)| (index as u32, memory_type.property_flags))
    }

    pub fn create_fence(self: &Arc<Self>, signaled: bool) -> Result<Fence, GpuError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { self.device.create_fence(&info, None) }.vk("vkCreateFence")?;
        Ok(unsafe { DeviceHandle::from_raw(self, fence) })
    }

    pub fn create_semaphore(self: &Arc<Self>) -> Result<Semaphore, GpuError> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore =
            unsafe { self.device.create_semaphore(&info, None) }.vk("vkCreateSemaphore")?;
        Ok(unsafe { DeviceHandle::from_raw(self, semaphore) })
    }

    pub fn create_command_buffer(self: &Arc<Self>) -> Result<CommandBuffer, GpuError> {
        let pool = lock(self.command_pool.lock());
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .vk("vkAllocateCommandBuffers")?;
        drop(pool);
        buffers
            .into_iter()
            .next()
            .map(|handle| CommandBuffer::new(self, handle))
            .ok_or(GpuError::Vulkan {
                call: "vkAllocateCommandBuffers",
                result: vk::Result::ERROR_UNKNOWN,
            })
    }

    /// Create a shader module for a named compute shader.
    pub fn create_shader_module(
        self: &Arc<Self>,
        name: &str,
        workgroup_size: u32,
    ) -> Result<ShaderModule, GpuError> {
        let code = shaders::load_spirv(name, self.shader_dir(), workgroup_size)?;
        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module =
            unsafe { self.device.create_shader_module(&info, None) }.vk("vkCreateShaderModule")?;
        Ok(unsafe { DeviceHandle::from_raw(self, module) })
    }

    pub(crate) fn allocate_descriptor_set(
        self: &Arc<Self>,
        layout: vk::DescriptorSetLayout,
    ) -> Result<DescriptorSet, GpuError> {
        let pool = lock(self.descriptor_pool.lock());
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }
            .vk("vkAllocateDescriptorSets")?;
        drop(pool);
        sets.into_iter()
            .next()
            .map(|handle| DescriptorSet::new(self, handle))
            .ok_or(GpuError::Vulkan {
                call: "vkAllocateDescriptorSets",
                result: vk::Result::ERROR_OUT_OF_POOL_MEMORY,
            })
    }

    pub(crate) fn free_descriptor_set(&self, set: vk::DescriptorSet) {
        let pool = lock(self.descriptor_pool.lock());
        if let Err(err) = unsafe { self.device.free_descriptor_sets(*pool, &[set]) } {
            log::warn!("vkFreeDescriptorSets failed: {err}");
        }
    }

    pub(crate) fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let pool = lock(self.command_pool.lock());
        unsafe { self.device.free_command_buffers(*pool, &[command_buffer]) };
    }

    /// Reset and record a command buffer.
    ///
    /// The command pool stays locked for the whole recording.
    pub fn record<F>(&self, command_buffer: &CommandBuffer, record: F) -> Result<(), GpuError>
    where
        F: FnOnce(&Recording<'_>),
    {
        let _pool = lock(self.command_pool.lock());
        let raw = command_buffer.raw();
        unsafe {
            self.device
                .reset_command_buffer(raw, vk::CommandBufferResetFlags::empty())
                .vk("vkResetCommandBuffer")?;
            self.device
                .begin_command_buffer(raw, &vk::CommandBufferBeginInfo::default())
                .vk("vkBeginCommandBuffer")?;
        }
        record(&Recording::new(self, raw));
        unsafe { self.device.end_command_buffer(raw) }.vk("vkEndCommandBuffer")
    }

    /// Submit batches to the queue at `queue_index`.
    pub fn submit(
        &self,
        queue_index: usize,
        submits: &[vk::SubmitInfo<'_>],
        fence: Option<&Fence>,
    ) -> Result<(), GpuError> {
        let queue = self.queue(queue_index)?;
        let queue = lock(queue.lock());
        let fence = fence.map_or(vk::Fence::null(), Fence::raw);
        unsafe { self.device.queue_submit(*queue, submits, fence) }.vk("vkQueueSubmit")
    }

    pub fn queue_wait_idle(&self, queue_index: usize) -> Result<(), GpuError> {
        let queue = self.queue(queue_index)?;
        let queue = lock(queue.lock());
        unsafe { self.device.queue_wait_idle(*queue) }.vk("vkQueueWaitIdle")
    }

    fn queue(&self, index: usize) -> Result<&Mutex<vk::Queue>, GpuError> {
        self.queues.get(index).ok_or(GpuError::InvalidQueue {
            index,
            count: self.queues.len(),
        })
    }

    /// Block until `fence` is signaled. `None` waits forever.
    pub fn wait_for_fence(&self, fence: &Fence, timeout: Option<Duration>) -> Result<(), GpuError> {
        let nanos = timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));
        match unsafe { self.device.wait_for_fences(&[fence.raw()], true, nanos) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::Timeout(timeout.unwrap_or_default())),
            Err(result) => Err(result).vk("vkWaitForFences"),
        }
    }

    pub fn reset_fence(&self, fence: &Fence) -> Result<(), GpuError> {
        unsafe { self.device.reset_fences(&[fence.raw()]) }.vk("vkResetFences")
    }

    /// Record, submit and wait for a throwaway command buffer.
    ///
    /// The wait is bounded by `timeout` like any other fence wait.
    pub fn run_one_shot<F>(
        self: &Arc<Self>,
        queue_index: usize,
        timeout: Option<Duration>,
        record: F,
    ) -> Result<(), GpuError>
    where
        F: FnOnce(&Recording<'_>),
    {
        let command_buffer = self.create_command_buffer()?;
        self.record(&command_buffer, record)?;
        let fence = self.create_fence(false)?;
        let command_buffers = [command_buffer.raw()];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        self.submit(queue_index, &[submit], Some(&fence))?;
        self.wait_for_fence(&fence, timeout)
    }

    /// Reserve `count` consecutive timestamp queries, if the device has them and any are free.
    pub fn lease_queries(self: &Arc<Self>, count: u32) -> Option<TimestampQueries> {
        let period = self.info.timestamp_period?;
        if count == 0 || count > QUERY_POOL_SIZE {
            return None;
        }
        let mask = ((1u64 << count) - 1) as u32;
        let mut leased = lock(self.query_leases.lock());
        let first = (0..=QUERY_POOL_SIZE - count).find(|start| *leased & (mask << start) == 0)?;
        *leased |= mask << first;
        Some(TimestampQueries::new(self, self.query_pool, first, count, period))
    }

    pub(crate) fn release_queries(&self, first: u32, count: u32) {
        let mask = ((1u64 << count) - 1) as u32;
        *lock(self.query_leases.lock()) &= !(mask << first);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::warn!("vkDeviceWaitIdle failed during shutdown: {err}");
            }
            self.device.destroy_query_pool(self.query_pool, None);
            self.device.destroy_descriptor_pool(
                *self
                    .descriptor_pool
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner),
                None,
            );
            self.device.destroy_command_pool(
                *self
                    .command_pool
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner),
                None,
            );
            self.device.destroy_device(None);
        }
    }
}

fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

fn check_instance_version(entry: &ash::Entry) -> Result<(), GpuError> {
    let version = unsafe { entry.try_enumerate_instance_version() }
        .vk("vkEnumerateInstanceVersion")?
        .unwrap_or(vk::API_VERSION_1_0);
    if version < vk::API_VERSION_1_1 {
        return Err(GpuError::UnsupportedVersion {
            required: format_version(vk::API_VERSION_1_1),
            found: format_version(version),
        });
    }
    Ok(())
}

fn has_layer(entry: &ash::Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers
                .iter()
                .any(|layer| layer.layer_name_as_c_str().is_ok_and(|n| n == name))
        })
        .unwrap_or(false)
}

fn has_extension(entry: &ash::Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .map(|extensions| {
            extensions
                .iter()
                .any(|extension| extension.extension_name_as_c_str().is_ok_and(|n| n == name))
        })
        .unwrap_or(false)
}

fn create_instance(entry: ash::Entry, config: &ContextConfig) -> Result<InstanceOwner, GpuError> {
    let app_name = CString::new(config.application_name.replace('\0', "")).unwrap_or_default();
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .engine_name(c"spectrum-gpu")
        .api_version(vk::API_VERSION_1_1);

    let validation = config.enable_validation && has_layer(&entry, VALIDATION_LAYER);
    if config.enable_validation && !validation {
        log::warn!("Vulkan validation requested but the layer is not installed");
    }
    let debug_utils =
        validation && has_extension(&entry, ash::ext::debug_utils::NAME);

    let mut layers = Vec::new();
    let mut extensions = Vec::new();
    if validation {
        layers.push(VALIDATION_LAYER.as_ptr());
    }
    if debug_utils {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions);
    let instance =
        unsafe { entry.create_instance(&create_info, None) }.vk("vkCreateInstance")?;

    let mut owner = InstanceOwner {
        instance,
        debug: None,
        entry,
    };

    if debug_utils {
        let loader = ash::ext::debug_utils::Instance::new(&owner.entry, &owner.instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));
        let messenger = unsafe { loader.create_debug_utils_messenger(&info, None) }
            .vk("vkCreateDebugUtilsMessengerEXT")?;
        owner.debug = Some(DebugMessenger { loader, messenger });
    }

    Ok(owner)
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        Cow::Borrowed("<empty message>")
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!(target: "vulkan", "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!(target: "vulkan", "{message}");
    } else {
        log::debug!(target: "vulkan", "{message}");
    }
    vk::FALSE
}

/// Pick a device with a compute queue family: the configured index, else the best-scoring one.
fn select_physical_device(
    instance: &ash::Instance,
    config: &ContextConfig,
) -> Result<(vk::PhysicalDevice, u32, u32), GpuError> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.vk("vkEnumeratePhysicalDevices")?;

    if let Some(index) = config.device_index {
        let device = *devices.get(index).ok_or(GpuError::InvalidDeviceIndex {
            index,
            count: devices.len(),
        })?;
        let (family, queues) =
            find_compute_queue_family(instance, device).ok_or(GpuError::NoComputeDevice)?;
        return Ok((device, family, queues));
    }

    devices
        .iter()
        .enumerate()
        .filter_map(|(index, &device)| {
            find_compute_queue_family(instance, device)
                .map(|(family, queues)| (index, device, family, queues))
        })
        .max_by_key(|&(index, device, ..)| (device_score(instance, device), usize::MAX - index))
        .map(|(_, device, family, queues)| (device, family, queues))
        .ok_or(GpuError::NoComputeDevice)
}

fn device_score(instance: &ash::Instance, device: vk::PhysicalDevice) -> u32 {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

/// First queue family with compute support, with its queue count.
fn find_compute_queue_family(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
) -> Option<(u32, u32)> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    families
        .iter()
        .position(|family| {
            family.queue_flags.contains(vk::QueueFlags::COMPUTE) && family.queue_count > 0
        })
        .map(|index| (index as u32, families[index].queue_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Buffer, MemoryUsage};

    #[test]
    fn test_default_config() {
        let config = ContextConfig::default();
        assert_eq!(config.max_queues, MAX_QUEUES);
        assert!(!config.enable_validation);
        assert!(config.shader_dir.is_none());
    }

    #[test]
    fn test_config_json_defaults_missing_fields() {
        let config: ContextConfig = serde_json::from_str(r#"{"max_queues": 1}"#).unwrap();
        assert_eq!(config.max_queues, 1);
        assert_eq!(config.max_engines, ContextConfig::default().max_engines);
    }

    #[test]
    fn test_vk_result_mapping() {
        let lost: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(lost.vk("vkQueueSubmit"), Err(GpuError::DeviceLost)));

        let oom: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        match oom.vk("vkAllocateMemory") {
            Err(GpuError::Vulkan { call, result }) => {
                assert_eq!(call, "vkAllocateMemory");
                assert_eq!(result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(vk::API_VERSION_1_1), "1.1.0");
    }

    #[test]
    fn test_gpu_context_creation() {
        // May fail on CI without a Vulkan driver, so just check it doesn't panic
        if let Ok(ctx) = Context::new(&ContextConfig::default()) {
            assert!(ctx.queue_count() >= 1);
            assert!(ctx.queue_count() <= MAX_QUEUES as usize);
            assert!(!ctx.info().name.is_empty());
        }
    }

    #[test]
    fn test_run_one_shot_bounded_wait() {
        let Ok(ctx) = Context::new(&ContextConfig::default()) else {
            return;
        };
        let mut buffer = Buffer::new(
            &ctx,
            64,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::Readback,
        )
        .unwrap();
        buffer.copy_from(&[7u32; 16], 0).unwrap();

        ctx.run_one_shot(0, Some(Duration::from_secs(5)), |recording| {
            recording.fill_buffer(&buffer, 0);
            recording.host_read_barrier();
        })
        .unwrap();

        let mut words = [1u32; 16];
        buffer.copy_to(&mut words, 0).unwrap();
        assert_eq!(words, [0u32; 16]);
        assert!(matches!(
            ctx.run_one_shot(2, Some(Duration::from_secs(5)), |_| {}),
            Err(GpuError::InvalidQueue { index: 2, .. })
        ));
    }

    #[test]
    fn test_query_leases_do_not_overlap() {
        let Ok(ctx) = Context::new(&ContextConfig::default()) else {
            return;
        };
        let (Some(a), Some(b)) = (ctx.lease_queries(8), ctx.lease_queries(8)) else {
            return;
        };
        assert_ne!(a.first(), b.first());
        let first_a = a.first();
        drop(a);
        let c = ctx.lease_queries(8).unwrap();
        assert_eq!(c.first(), first_a);
    }
}
