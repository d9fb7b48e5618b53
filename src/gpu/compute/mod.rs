//! Compute pipelines for the shift-and-decimate cascade.

mod params;
mod pipeline;

pub mod decimator;
pub mod shifter;

pub use decimator::{Decimator, DecimatorBindings};
pub use params::{DecimatePushConstants, ShiftParams, ShiftPushConstants};
pub use pipeline::ComputePipeline;
pub use shifter::Shifter;
