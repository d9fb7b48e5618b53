//! Synthetic complex signals for tests, benches and demos.

use std::f32::consts::TAU;

use super::Complex32;

/// Complex exponential at `frequency` Hz.
///
/// # Arguments
/// * `frequency` - Tone frequency in Hz, negative for the lower sideband
/// * `sample_rate` - Sample rate in Hz
/// * `count` - Number of samples
/// * `amplitude` - Peak magnitude
pub fn tone(frequency: f32, sample_rate: f32, count: usize, amplitude: f32) -> Vec<Complex32> {
    let step = frequency as f64 / sample_rate as f64;
    (0..count)
        .map(|i| {
            let turns = (step * i as f64).fract() as f32;
            Complex32::from_polar(amplitude, TAU * turns)
        })
        .collect()
}

pub fn constant(value: Complex32, count: usize) -> Vec<Complex32> {
    vec![value; count]
}

/// Complex white noise with both components uniform in `[-amplitude, amplitude]`.
///
/// Uses a linear congruential generator so runs are reproducible.
pub fn white_noise(count: usize, amplitude: f32, seed: u64) -> Vec<Complex32> {
    let mut state = seed;
    let a: u64 = 6364136223846793005;
    let c: u64 = 1442695040888963407;
    let mut next = move || {
        state = state.wrapping_mul(a).wrapping_add(c);
        ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
    };

    (0..count)
        .map(|_| {
            let re = next();
            let im = next();
            Complex32::new(re, im) * amplitude
        })
        .collect()
}

/// Mean power of a signal.
pub fn power(samples: &[Complex32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32
}
