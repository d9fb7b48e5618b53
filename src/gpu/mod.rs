//! Vulkan compute using ash.
//!
//! Provides the device context, buffers, command recording helpers and the
//! shifter/decimator compute pipelines. Shaders are written in WGSL and
//! compiled to SPIR-V with naga at pipeline creation.

pub mod buffer;
pub mod compute;
pub mod context;
pub mod handle;
pub mod query;
pub mod recording;
pub mod shaders;

pub use buffer::{Buffer, MemoryUsage};
pub use compute::{ComputePipeline, Decimator, DecimatorBindings, Shifter};
pub use context::{Context, ContextConfig, DeviceInfo, GpuError, MAX_QUEUES};
pub use handle::{CommandBuffer, DescriptorSet, DeviceHandle, Fence, Semaphore, ShaderModule};
pub use query::TimestampQueries;
pub use recording::Recording;
