//! Parameter blocks shared with the compute shaders.
//!
//! These structs must match the WGSL declarations exactly.

/// Shifter phase parameters, stored in a per-slot storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShiftParams {
    pub phi: f32,
    pub omega: f32,
}

impl ShiftParams {
    pub fn new(phi: f32, omega: f32) -> Self {
        Self { phi, omega }
    }
}

/// Shifter push constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShiftPushConstants {
    /// First sample of the block inside the bound buffer.
    pub offset: u32,
    pub count: u32,
}

/// Decimator push constants.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DecimatePushConstants {
    pub num_taps: u32,
    /// First output sample inside the bound output buffer.
    pub output_offset: u32,
    /// Number of output samples.
    pub count: u32,
    pub stage: u32,
}
