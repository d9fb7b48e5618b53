//! Generalised cosine window functions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Window {
    Rectangular,
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris,
    BlackmanNuttall,
    FlatTop,
}

impl Window {
    /// Cosine-series coefficients, applied with alternating signs.
    pub fn coefficients(self) -> &'static [f64] {
        match self {
            Window::Rectangular => &[1.0],
            Window::Hann => &[0.5, 0.5],
            Window::Hamming => &[0.54, 0.46],
            Window::Blackman => &[0.42, 0.5, 0.08],
            Window::BlackmanHarris => &[0.35875, 0.48829, 0.14128, 0.01168],
            Window::BlackmanNuttall => &[0.3635819, 0.4891775, 0.1365995, 0.0106411],
            Window::FlatTop => &[1.0, 1.930, 1.290, 0.388, 0.028],
        }
    }

    /// Window of `size` points, symmetric over `size - 1`.
    pub fn make(self, size: usize) -> Vec<f32> {
        if size <= 1 {
            return vec![1.0; size];
        }
        let span = (size - 1) as f64;
        (0..size)
            .map(|i| {
                self.coefficients()
                    .iter()
                    .enumerate()
                    .map(|(j, c)| {
                        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
                        sign * c * (j as f64 * std::f64::consts::TAU * i as f64 / span).cos()
                    })
                    .sum::<f64>() as f32
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_are_symmetric() {
        for window in [Window::Hann, Window::BlackmanNuttall, Window::FlatTop] {
            let w = window.make(41);
            for i in 0..w.len() / 2 {
                assert!((w[i] - w[w.len() - 1 - i]).abs() < 1e-6, "{window:?} at {i}");
            }
        }
    }

    #[test]
    fn test_blackman_nuttall_peak_and_edges() {
        let w = Window::BlackmanNuttall.make(9);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!(w[0] < 1e-3);
        assert!(w[0] >= 0.0);
    }

    #[test]
    fn test_degenerate_sizes() {
        assert!(Window::Hann.make(0).is_empty());
        assert_eq!(Window::Hann.make(1), vec![1.0]);
    }
}
