//! Spectrum GPU Core
//!
//! Vulkan compute offload for real-time frequency shifting and decimation of
//! complex radio sample streams.
//!
//! # Features
//!
//! - Vulkan device, queue and pool management via ash
//! - WGSL compute shaders compiled to SPIR-V at runtime via naga
//! - Single-queue and multi-queue double-buffered shift-decimator cascades
//! - Half-band filter design and a CPU reference implementation
//! - C ABI, plus Python bindings via PyO3 (when `python` feature is enabled)

pub mod capi;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod gpu;
pub mod shift_decimator;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use dsp::{Complex32, ReferenceShiftDecimator, Taps, TapsError, Window};
pub use engine::{
    PerfReport, Scheduling, ShiftDecimate, ShiftDecimator, ShiftDecimatorConfig,
    ShiftDecimatorError,
};
pub use gpu::{Context, ContextConfig, DeviceInfo, GpuError};
pub use shift_decimator::GpuShiftDecimator;

// Python bindings (only when python feature is enabled)
#[cfg(feature = "python")]
#[allow(deprecated)] // PyO3 0.27 deprecations - APIs still functional
mod python_bindings {
    use crate::dsp::{as_complex, as_interleaved, Complex32};
    use crate::engine::{Scheduling, ShiftDecimatorConfig};
    use crate::gpu::{Context, ContextConfig};
    use crate::shift_decimator::GpuShiftDecimator;
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    /// GPU frequency shifter and power-of-2 decimator.
    #[pyclass(name = "ShiftDecimator", unsendable)]
    pub struct PyShiftDecimator {
        inner: GpuShiftDecimator,
        output: Vec<Complex32>,
    }

    #[pymethods]
    impl PyShiftDecimator {
        #[new]
        #[pyo3(signature = (sample_rate, ratio, force_single_queue=false))]
        fn new(sample_rate: u32, ratio: usize, force_single_queue: bool) -> PyResult<Self> {
            if !GpuShiftDecimator::is_supported_ratio(ratio) {
                return Err(PyValueError::new_err(format!(
                    "Ratio must be a power of 2 greater than 1, got {ratio}"
                )));
            }
            let context = Context::new(&ContextConfig::from_env())
                .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
            let scheduling = if force_single_queue {
                Scheduling::SingleQueue
            } else {
                Scheduling::Auto
            };
            let config = ShiftDecimatorConfig::default().with_scheduling(scheduling);
            let inner = GpuShiftDecimator::new(&context, sample_rate, ratio, &config)
                .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
            Ok(Self {
                inner,
                output: Vec::new(),
            })
        }

        /// Tune the oscillator to `frequency` Hz.
        fn set_shift_frequency(&mut self, frequency: f32) {
            self.inner.set_shift_frequency(frequency);
        }

        /// Decimate interleaved `re, im` floats; returns the previous block's output.
        fn decimate(&mut self, py: Python<'_>, samples: Vec<f32>) -> PyResult<Vec<f32>> {
            if samples.len() % 2 != 0 {
                return Err(PyValueError::new_err("Expected interleaved re, im pairs"));
            }
            let max = self.inner.engine().layout().max_block_size();
            self.output.resize(max / self.inner.ratio(), Complex32::default());

            let inner = &mut self.inner;
            let output = &mut self.output;
            let written = py
                .allow_threads(|| inner.decimate(as_complex(&samples), output))
                .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
            Ok(as_interleaved(&self.output[..written]).to_vec())
        }

        #[getter]
        fn ratio(&self) -> usize {
            self.inner.ratio()
        }

        #[getter]
        fn sample_rate(&self) -> u32 {
            self.inner.sample_rate()
        }

        #[getter]
        fn latency_blocks(&self) -> usize {
            self.inner.latency_blocks()
        }

        /// Latest performance report as JSON, if one is available.
        fn perf_report(&self) -> PyResult<Option<String>> {
            self.inner
                .engine()
                .perf_report()
                .map(|report| {
                    serde_json::to_string_pretty(report)
                        .map_err(|e| PyRuntimeError::new_err(e.to_string()))
                })
                .transpose()
        }
    }

    /// Whether `ratio` is a supported decimation ratio.
    #[pyfunction]
    fn is_supported_ratio(ratio: usize) -> bool {
        GpuShiftDecimator::is_supported_ratio(ratio)
    }

    /// Spectrum GPU Python module
    #[pymodule]
    pub fn spectrum_gpu(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        m.add_class::<PyShiftDecimator>()?;
        m.add_function(wrap_pyfunction!(is_supported_ratio, m)?)?;
        Ok(())
    }
}

#[cfg(feature = "python")]
pub use python_bindings::*;
