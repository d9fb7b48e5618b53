//! CPU-side signal processing support.
//!
//! This module provides:
//! - Filter design (windowed-sinc low-pass and half-band cascades)
//! - Window functions
//! - A non-pipelined reference shift-decimator used to check GPU output
//! - Synthetic complex test signals

pub mod reference;
pub mod signal;
pub mod taps;
pub mod window;

// `Pod` with the `bytemuck` feature; same layout as `vec2<f32>` in the shaders.
pub use num_complex::Complex32;

pub use reference::{phase_at, shift, ReferenceShiftDecimator};
pub use taps::{
    estimate_tap_count, half_band, low_pass, low_pass_with, windowed_sinc, Taps, TapsError,
    MAX_STAGES,
};
pub use window::Window;

/// View complex samples as interleaved `re, im` floats.
pub fn as_interleaved(samples: &[Complex32]) -> &[f32] {
    bytemuck::cast_slice(samples)
}

/// View interleaved floats as complex samples. A trailing odd float is ignored.
pub fn as_complex(samples: &[f32]) -> &[Complex32] {
    bytemuck::cast_slice(&samples[..samples.len() & !1])
}

pub fn as_complex_mut(samples: &mut [f32]) -> &mut [Complex32] {
    let even = samples.len() & !1;
    bytemuck::cast_slice_mut(&mut samples[..even])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_views() {
        let mut floats = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(as_complex(&floats), &[Complex32::new(1.0, 2.0), Complex32::new(3.0, 4.0)]);
        as_complex_mut(&mut floats)[1] = Complex32::default();
        assert_eq!(floats, vec![1.0, 2.0, 0.0, 0.0, 5.0]);
        assert_eq!(as_interleaved(&[Complex32::new(7.0, 8.0)]), &[7.0, 8.0]);
    }
}
