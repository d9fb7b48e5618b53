//! C ABI for embedding the shift-decimator in other runtimes.
//!
//! Handles are opaque boxed pointers. Every function accepts null and reports
//! failure instead of dereferencing it.

use std::sync::Arc;

use crate::dsp::Taps;
use crate::engine::{
    Scheduling, ShiftDecimate, ShiftDecimator, ShiftDecimatorConfig, ShiftDecimatorError,
};
use crate::gpu::{Context, ContextConfig};

pub struct SgpuContext {
    context: Arc<Context>,
}

pub struct SgpuShiftDecimator {
    engine: ShiftDecimator,
}

/// Open a Vulkan context with environment overrides applied.
///
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn sgpu_context_create(enable_validation: bool) -> *mut SgpuContext {
    let mut config = ContextConfig::from_env();
    config.enable_validation |= enable_validation;
    match Context::new(&config) {
        Ok(context) => Box::into_raw(Box::new(SgpuContext { context })),
        Err(err) => {
            log::error!("sgpu_context_create: {err}");
            std::ptr::null_mut()
        }
    }
}

/// Release a context. Shift-decimators created from it keep the device alive
/// until they are destroyed too.
///
/// # Safety
/// `context` must be null or a pointer returned by `sgpu_context_create`
/// that has not been destroyed.
#[no_mangle]
pub unsafe extern "C" fn sgpu_context_destroy(context: *mut SgpuContext) {
    if !context.is_null() {
        drop(Box::from_raw(context));
    }
}

/// Create a shift-decimator.
///
/// `taps` holds `stage_count` coefficient arrays back to back, stage 0 first,
/// with lengths in `tap_lengths`. A `prefer_queue_count` of 1 or less forces
/// single-queue scheduling. Returns null on failure.
///
/// # Safety
/// `context` must be a live context handle. `tap_lengths` must point to
/// `stage_count` values and `taps` to their sum of floats.
#[no_mangle]
pub unsafe extern "C" fn sgpu_shift_decimator_create(
    context: *const SgpuContext,
    taps: *const f32,
    tap_lengths: *const u32,
    stage_count: u32,
    prefer_queue_count: u32,
) -> *mut SgpuShiftDecimator {
    let Some(context) = context.as_ref() else {
        log::error!("sgpu_shift_decimator_create: null context");
        return std::ptr::null_mut();
    };
    if taps.is_null() || tap_lengths.is_null() {
        log::error!("sgpu_shift_decimator_create: null taps");
        return std::ptr::null_mut();
    }

    let lengths = std::slice::from_raw_parts(tap_lengths, stage_count as usize);
    let total = lengths.iter().map(|&len| len as usize).sum();
    let flat = std::slice::from_raw_parts(taps, total);
    let mut offset = 0;
    let stages = lengths
        .iter()
        .map(|&len| {
            let stage = flat[offset..offset + len as usize].to_vec();
            offset += len as usize;
            stage
        })
        .collect();

    let scheduling = if prefer_queue_count <= 1 {
        Scheduling::SingleQueue
    } else {
        Scheduling::Auto
    };
    let config = ShiftDecimatorConfig::default().with_scheduling(scheduling);

    let engine = Taps::new(stages)
        .map_err(ShiftDecimatorError::from)
        .and_then(|taps| ShiftDecimator::new(&context.context, taps, &config));
    match engine {
        Ok(engine) => Box::into_raw(Box::new(SgpuShiftDecimator { engine })),
        Err(err) => {
            log::error!("sgpu_shift_decimator_create: {err}");
            std::ptr::null_mut()
        }
    }
}

/// Process one block in place.
///
/// `samples` holds `capacity` floats of interleaved `re, im` pairs, the first
/// `sample_count` pairs being the block. Returns the number of complex
/// samples written to the front of `samples`, or -1 on failure.
///
/// # Safety
/// `decimator` must be a live handle and `samples` must point to `capacity`
/// writable floats.
#[no_mangle]
pub unsafe extern "C" fn sgpu_shift_decimator_process(
    decimator: *mut SgpuShiftDecimator,
    samples: *mut f32,
    capacity: usize,
    sample_count: u32,
    phi: f32,
    omega: f32,
) -> i64 {
    let Some(decimator) = decimator.as_mut() else {
        log::error!("sgpu_shift_decimator_process: null handle");
        return -1;
    };
    if samples.is_null() {
        log::error!("sgpu_shift_decimator_process: null samples");
        return -1;
    }

    let samples = std::slice::from_raw_parts_mut(samples, capacity);
    match decimator
        .engine
        .process(samples, sample_count as usize, phi, omega)
    {
        Ok(written) => written as i64,
        Err(err) => {
            log::error!("sgpu_shift_decimator_process: {err}");
            -1
        }
    }
}

/// Wait for in-flight work and release the shift-decimator.
///
/// # Safety
/// `decimator` must be null or a live handle; it is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn sgpu_shift_decimator_destroy(decimator: *mut SgpuShiftDecimator) {
    if !decimator.is_null() {
        drop(Box::from_raw(decimator));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles_fail_cleanly() {
        unsafe {
            let taps = [0.25f32, 0.5, 0.25];
            let lengths = [3u32];
            assert!(sgpu_shift_decimator_create(
                std::ptr::null(),
                taps.as_ptr(),
                lengths.as_ptr(),
                1,
                2
            )
            .is_null());

            let mut samples = [0.0f32; 8];
            assert_eq!(
                sgpu_shift_decimator_process(
                    std::ptr::null_mut(),
                    samples.as_mut_ptr(),
                    samples.len(),
                    4,
                    0.0,
                    0.0
                ),
                -1
            );
            sgpu_shift_decimator_destroy(std::ptr::null_mut());
            sgpu_context_destroy(std::ptr::null_mut());
        }
    }

    #[test]
    fn test_create_process_destroy() {
        let context = sgpu_context_create(false);
        if context.is_null() {
            return;
        }
        unsafe {
            let taps = [0.25f32, 0.5, 0.25];
            let lengths = [3u32];
            let decimator =
                sgpu_shift_decimator_create(context, taps.as_ptr(), lengths.as_ptr(), 1, 1);
            assert!(!decimator.is_null());

            let mut samples = vec![1.0f32; 512];
            let written = sgpu_shift_decimator_process(
                decimator,
                samples.as_mut_ptr(),
                samples.len(),
                256,
                0.0,
                0.0,
            );
            assert_eq!(written, 128);
            assert!(samples[..256].iter().all(|&s| s == 0.0));

            // misaligned block
            assert_eq!(
                sgpu_shift_decimator_process(decimator, samples.as_mut_ptr(), samples.len(), 100, 0.0, 0.0),
                -1
            );

            sgpu_shift_decimator_destroy(decimator);
            sgpu_context_destroy(context);
        }
    }
}
