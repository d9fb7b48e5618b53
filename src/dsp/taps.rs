//! FIR filter design and the validated per-stage taps cascade.

use super::window::Window;

/// Most decimation stages a cascade may have.
pub const MAX_STAGES: usize = 16;

/// Default stopband attenuation for designed filters.
pub const DEFAULT_ATTENUATION_DB: u32 = 90;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TapsError {
    #[error("At least one decimation stage is required")]
    Empty,
    #[error("Stage {0} has no coefficients")]
    EmptyStage(usize),
    #[error("Too many stages: max {max}, got {got}")]
    TooManyStages { max: usize, got: usize },
    #[error("Decimation ratio must be a power of 2 greater than 1, got {0}")]
    InvalidRatio(usize),
}

/// Tap count for a windowed-sinc filter, after Harris: `att / 22 * fs / tw`, made odd.
pub fn estimate_tap_count(transition_width: f32, sample_rate: f32, attenuation_db: u32) -> usize {
    let count = (attenuation_db as f64 / 22.0 * sample_rate as f64 / transition_width as f64)
        .max(1.0) as usize;
    if count % 2 == 0 {
        count + 1
    } else {
        count
    }
}

/// Windowed sinc centred in `window.len()` taps: `sinc(n * w) * w / pi * window`.
pub fn windowed_sinc(cutoff: f32, sample_rate: f32, window: &[f32]) -> Vec<f32> {
    let omega = std::f64::consts::TAU * cutoff as f64 / sample_rate as f64;
    let half = (window.len() as i64 - 1) / 2;
    window
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let n = i as i64 - half;
            let x = n as f64 * omega;
            let sinc = if x == 0.0 { 1.0 } else { x.sin() / x };
            (sinc * omega / std::f64::consts::PI * w as f64) as f32
        })
        .collect()
}

/// Low-pass filter with 90 dB attenuation and a Blackman-Nuttall window.
pub fn low_pass(sample_rate: f32, cutoff: f32, transition_width: f32) -> Vec<f32> {
    low_pass_with(
        sample_rate,
        cutoff,
        transition_width,
        DEFAULT_ATTENUATION_DB,
        Window::BlackmanNuttall,
    )
}

pub fn low_pass_with(
    sample_rate: f32,
    cutoff: f32,
    transition_width: f32,
    attenuation_db: u32,
    window: Window,
) -> Vec<f32> {
    let count = estimate_tap_count(transition_width, sample_rate, attenuation_db);
    windowed_sinc(cutoff, sample_rate, &window.make(count))
}

/// Half-band filter (cutoff at a quarter of the sample rate).
pub fn half_band(num_taps: usize) -> Vec<f32> {
    windowed_sinc(0.25, 1.0, &Window::BlackmanNuttall.make(num_taps))
}

/// Coefficients for each decimate-by-2 stage, stage 0 nearest the input.
///
/// `N` stages decimate by `2^N` in total.
#[derive(Debug, Clone, PartialEq)]
pub struct Taps {
    stages: Vec<Vec<f32>>,
}

impl Taps {
    pub fn new(stages: Vec<Vec<f32>>) -> Result<Self, TapsError> {
        if stages.is_empty() {
            return Err(TapsError::Empty);
        }
        if stages.len() > MAX_STAGES {
            return Err(TapsError::TooManyStages {
                max: MAX_STAGES,
                got: stages.len(),
            });
        }
        if let Some(stage) = stages.iter().position(Vec::is_empty) {
            return Err(TapsError::EmptyStage(stage));
        }
        Ok(Self { stages })
    }

    /// Low-pass cascade for an overall `ratio`.
    ///
    /// Later stages run at lower rates and get narrower transition bands, so
    /// stage 0 is the shortest filter.
    pub fn half_band_cascade(ratio: usize) -> Result<Self, TapsError> {
        if ratio <= 1 || !ratio.is_power_of_two() {
            return Err(TapsError::InvalidRatio(ratio));
        }
        let n = ratio.trailing_zeros() as i32;
        let mut stages: Vec<Vec<f32>> = (0..n)
            .map(|i| low_pass(1.0, 0.25, (0.1 * 2f32.powi(i)).min(0.5)))
            .collect();
        stages.reverse();
        Self::new(stages)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stages(&self) -> &[Vec<f32>] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> &[f32] {
        &self.stages[index]
    }

    /// Overall decimation factor, `2^N`.
    pub fn decimation(&self) -> usize {
        1 << self.stages.len()
    }

    /// History samples carried between blocks for `stage`.
    pub fn history_len(&self, stage: usize) -> usize {
        self.stages[stage].len() - 1
    }

    pub fn total_taps(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }
}

impl TryFrom<Vec<Vec<f32>>> for Taps {
    type Error = TapsError;

    fn try_from(stages: Vec<Vec<f32>>) -> Result<Self, Self::Error> {
        Self::new(stages)
    }
}

impl From<Taps> for Vec<Vec<f32>> {
    fn from(taps: Taps) -> Self {
        taps.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tap_count_is_odd() {
        assert_eq!(estimate_tap_count(0.1, 1.0, 90), 41);
        assert_eq!(estimate_tap_count(0.2, 1.0, 90), 21);
        assert_eq!(estimate_tap_count(0.4, 1.0, 90), 11);
        assert_eq!(estimate_tap_count(0.5, 1.0, 90), 9);
    }

    #[test]
    fn test_low_pass_unity_dc_gain() {
        let taps = low_pass(1.0, 0.25, 0.1);
        let gain: f32 = taps.iter().sum();
        assert!((gain - 1.0).abs() < 0.01, "DC gain {gain}");
    }

    #[test]
    fn test_half_band_zeros_at_even_offsets() {
        let taps = half_band(9);
        assert_eq!(taps.len(), 9);
        assert!((taps[4] - 0.5).abs() < 1e-5);
        // sinc(n * pi / 2) vanishes for even n != 0
        assert!(taps[0].abs() < 1e-7);
        assert!(taps[2].abs() < 1e-7);
        assert!((taps[1] - taps[7]).abs() < 1e-7);
    }

    #[test]
    fn test_half_band_cascade_shape() {
        let taps = Taps::half_band_cascade(64).unwrap();
        assert_eq!(taps.stage_count(), 6);
        assert_eq!(taps.decimation(), 64);
        let lengths: Vec<usize> = taps.stages().iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![9, 9, 9, 11, 21, 41]);
        assert_eq!(taps.history_len(5), 40);
        assert_eq!(taps.total_taps(), 100);
    }

    #[test]
    fn test_invalid_ratios() {
        assert_eq!(Taps::half_band_cascade(1), Err(TapsError::InvalidRatio(1)));
        assert_eq!(Taps::half_band_cascade(12), Err(TapsError::InvalidRatio(12)));
    }

    #[test]
    fn test_taps_validation() {
        assert_eq!(Taps::new(vec![]), Err(TapsError::Empty));
        assert_eq!(
            Taps::new(vec![vec![1.0], vec![]]),
            Err(TapsError::EmptyStage(1))
        );
        assert_eq!(
            Taps::new(vec![vec![1.0]; MAX_STAGES + 1]),
            Err(TapsError::TooManyStages {
                max: MAX_STAGES,
                got: MAX_STAGES + 1
            })
        );
        assert!(Taps::try_from(vec![vec![0.25, 0.5, 0.25]]).is_ok());
    }
}
