//! Frequency-shifting decimator for a fixed input rate and ratio.

use std::f32::consts::TAU;
use std::sync::Arc;

use crate::dsp::{as_complex, as_interleaved, Complex32, Taps, MAX_STAGES};
use crate::engine::{ShiftDecimate, ShiftDecimator, ShiftDecimatorConfig, ShiftDecimatorError};
use crate::gpu::Context;

/// Shifts a stream by a tuned frequency and decimates it by a power of 2.
///
/// The shift phase is tracked across calls, so consecutive blocks form one
/// continuous oscillator.
pub struct GpuShiftDecimator {
    engine: ShiftDecimator,
    sample_rate: u32,
    ratio: usize,
    phi: f32,
    omega: f32,
    scratch: Vec<f32>,
}

impl GpuShiftDecimator {
    pub fn new(
        context: &Arc<Context>,
        sample_rate: u32,
        ratio: usize,
        config: &ShiftDecimatorConfig,
    ) -> Result<Self, ShiftDecimatorError> {
        let taps = Taps::half_band_cascade(ratio)?;
        log::debug!(
            "Shift-decimator for ratio {ratio}: {} stages, {} taps",
            taps.stage_count(),
            taps.total_taps()
        );
        let engine = ShiftDecimator::new(context, taps, config)?;
        Ok(Self {
            engine,
            sample_rate,
            ratio,
            phi: 0.0,
            omega: 0.0,
            scratch: Vec::new(),
        })
    }

    /// Whether `ratio` can be built with the default configuration.
    pub fn is_supported_ratio(ratio: usize) -> bool {
        Self::is_supported_ratio_with(ratio, &ShiftDecimatorConfig::default())
    }

    /// Whether `ratio` is a power of 2 greater than 1 whose cascade `config` accepts.
    ///
    /// The block alignment grows with the ratio, so large ratios need a larger
    /// `max_block_size`.
    pub fn is_supported_ratio_with(ratio: usize, config: &ShiftDecimatorConfig) -> bool {
        ratio > 1
            && ratio.is_power_of_two()
            && ratio.trailing_zeros() as usize <= MAX_STAGES
            && Taps::half_band_cascade(ratio).is_ok_and(|taps| config.validate(&taps).is_ok())
    }

    /// Tune to `frequency` Hz, restarting the oscillator at phase 0.
    pub fn set_shift_frequency(&mut self, frequency: f32) {
        self.phi = 0.0;
        self.omega = TAU * frequency / self.sample_rate as f32;
    }

    /// Process one block and write the decimated samples to `output`.
    ///
    /// Returns the number of samples written, which belong to the block passed
    /// on the previous call (zeros on the first call).
    pub fn decimate(
        &mut self,
        input: &[Complex32],
        output: &mut [Complex32],
    ) -> Result<usize, ShiftDecimatorError> {
        let length = input.len();
        self.engine.layout().validate(length)?;
        // reject before submitting, or the previous block's output is lost
        let pending = self.engine.pending_output_len(length);
        if output.len() < pending {
            return Err(ShiftDecimatorError::BufferTooSmall {
                needed: 2 * pending,
                len: 2 * output.len(),
            });
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(as_interleaved(input));
        // room for a larger previous block's output
        let max_output = self.engine.layout().output_len(self.engine.layout().max_block_size());
        if self.scratch.len() < 2 * max_output {
            self.scratch.resize(2 * max_output, 0.0);
        }

        let written = self
            .engine
            .process(&mut self.scratch, length, self.phi, self.omega)?;
        if self.omega != 0.0 {
            self.phi = (self.phi + self.omega * length as f32).rem_euclid(TAU);
        }
        output[..written].copy_from_slice(&as_complex(&self.scratch)[..written]);
        Ok(written)
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output sample rate in Hz.
    pub fn output_rate(&self) -> f32 {
        self.sample_rate as f32 / self.ratio as f32
    }

    /// Blocks between input and the matching output.
    pub fn latency_blocks(&self) -> usize {
        self.engine.latency()
    }

    /// Current oscillator phase and per-sample increment, in radians.
    pub fn shift(&self) -> (f32, f32) {
        (self.phi, self.omega)
    }

    pub fn engine(&self) -> &ShiftDecimator {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_ratios() {
        assert!(GpuShiftDecimator::is_supported_ratio(2));
        assert!(GpuShiftDecimator::is_supported_ratio(64));
        assert!(!GpuShiftDecimator::is_supported_ratio(1));
        assert!(!GpuShiftDecimator::is_supported_ratio(0));
        assert!(!GpuShiftDecimator::is_supported_ratio(48));
        assert!(!GpuShiftDecimator::is_supported_ratio(1 << (MAX_STAGES + 1)));
    }

    #[test]
    fn test_supported_ratio_follows_block_size() {
        // 64-sample workgroups and 512K blocks allow at most 13 stages
        assert!(GpuShiftDecimator::is_supported_ratio(1 << 13));
        assert!(!GpuShiftDecimator::is_supported_ratio(1 << 14));
        assert!(!GpuShiftDecimator::is_supported_ratio(1 << MAX_STAGES));

        let config = ShiftDecimatorConfig {
            max_block_size: 1 << 22,
            ..Default::default()
        };
        assert!(GpuShiftDecimator::is_supported_ratio_with(1 << 14, &config));
        assert!(Taps::half_band_cascade(1 << 14)
            .is_ok_and(|taps| config.validate(&taps).is_ok()));
    }
}
