//! Non-pipelined CPU shift-decimator.
//!
//! Uses the same phase reduction and summation order as the compute shaders,
//! so GPU output can be checked against it sample by sample.

use std::f32::consts::TAU;

use super::taps::Taps;
use super::Complex32;
use crate::engine::{ShiftDecimate, ShiftDecimatorError};

fn fract(x: f32) -> f32 {
    x - x.floor()
}

/// Shift phase of sample `n` within a block.
///
/// The increment is reduced to turns and split at 1024 samples so the phase of
/// sample 500000 is as accurate as that of sample 5.
pub fn phase_at(phi: f32, omega: f32, n: u32) -> f32 {
    let step = omega / TAU;
    let block = fract(step * 1024.0);
    let turns = fract(step * (n & 1023) as f32) + fract(block * (n >> 10) as f32);
    phi + TAU * fract(turns)
}

/// Rotate `samples[n]` by `phi + omega * n` in place.
pub fn shift(samples: &mut [Complex32], phi: f32, omega: f32) {
    for (n, sample) in samples.iter_mut().enumerate() {
        *sample *= Complex32::cis(phase_at(phi, omega, n as u32));
    }
}

/// Filter `input` with `taps` and keep every second output.
///
/// `history` holds the last `taps.len() - 1` input samples of the previous
/// call and is replaced with the tail of this call's window.
fn decimate_stage(taps: &[f32], history: &mut Vec<Complex32>, input: &[Complex32]) -> Vec<Complex32> {
    let newest = taps.len() - 1;
    let mut window = Vec::with_capacity(history.len() + input.len());
    window.extend_from_slice(history);
    window.extend_from_slice(input);

    let output = (0..input.len() / 2)
        .map(|k| {
            let mut acc = Complex32::default();
            for (j, &tap) in taps.iter().enumerate() {
                acc += window[2 * k + newest - j] * tap;
            }
            acc
        })
        .collect();

    history.clear();
    history.extend_from_slice(&window[window.len() - newest..]);
    output
}

/// Reference cascade: shift, then decimate by 2 once per stage.
#[derive(Debug, Clone)]
pub struct ReferenceShiftDecimator {
    taps: Taps,
    histories: Vec<Vec<Complex32>>,
}

impl ReferenceShiftDecimator {
    pub fn new(taps: Taps) -> Self {
        let histories = (0..taps.stage_count())
            .map(|stage| vec![Complex32::default(); taps.history_len(stage)])
            .collect();
        Self { taps, histories }
    }

    /// Current input history of `stage`.
    pub fn history(&self, stage: usize) -> &[Complex32] {
        &self.histories[stage]
    }

    /// Process one block, returning `block.len() >> N` samples.
    pub fn process_block(&mut self, block: &[Complex32], phi: f32, omega: f32) -> Vec<Complex32> {
        let mut signal = block.to_vec();
        shift(&mut signal, phi, omega);
        for (taps, history) in self.taps.stages().iter().zip(&mut self.histories) {
            signal = decimate_stage(taps, history, &signal);
        }
        signal
    }

    pub fn reset(&mut self) {
        for history in &mut self.histories {
            history.fill(Complex32::default());
        }
    }
}

impl ShiftDecimate for ReferenceShiftDecimator {
    fn process(
        &mut self,
        samples: &mut [f32],
        sample_count: usize,
        phi: f32,
        omega: f32,
    ) -> Result<usize, ShiftDecimatorError> {
        let multiple = self.decimation();
        if sample_count == 0 {
            return Err(ShiftDecimatorError::EmptyBlock);
        }
        if sample_count % multiple != 0 {
            return Err(ShiftDecimatorError::Misaligned {
                count: sample_count,
                multiple,
            });
        }
        if samples.len() < sample_count * 2 {
            return Err(ShiftDecimatorError::BufferTooSmall {
                needed: sample_count * 2,
                len: samples.len(),
            });
        }

        let output = self.process_block(&super::as_complex(samples)[..sample_count], phi, omega);
        super::as_complex_mut(samples)[..output.len()].copy_from_slice(&output);
        Ok(output.len())
    }

    fn stage_count(&self) -> usize {
        self.taps.stage_count()
    }

    fn latency(&self) -> usize {
        0
    }
}
