//! Example: Shift a synthetic tone to baseband and decimate it on the GPU.
//!
//! Run with:
//!     cargo run --example decimate_tone

use anyhow::Context as _;
use spectrum_gpu::dsp::signal::{power, tone};
use spectrum_gpu::dsp::Complex32;
use spectrum_gpu::{Context, ContextConfig, GpuShiftDecimator, ShiftDecimatorConfig};

const SAMPLE_RATE: u32 = 2_048_000;
const RATIO: usize = 32;
const BLOCK_SIZE: usize = 256 * 1024;
const TONE_HZ: f32 = 250_000.0;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Spectrum GPU - Tone Decimation Example");
    println!("======================================\n");

    let context = Context::new(&ContextConfig::from_env()).context("No usable Vulkan device")?;
    println!("Device: {}", context.info().name);
    println!("  Compute queues: {}\n", context.queue_count());

    let mut decimator = GpuShiftDecimator::new(
        &context,
        SAMPLE_RATE,
        RATIO,
        &ShiftDecimatorConfig::default(),
    )?;
    println!("Decimator:");
    println!("  Strategy: {}", decimator.engine().name());
    println!("  Ratio: {RATIO} ({} Hz out)", decimator.output_rate());
    println!("  Stages: {}\n", decimator.engine().layout().stage_count());

    // A tone next to the wanted one stays outside the output band
    let wanted = tone(TONE_HZ, SAMPLE_RATE as f32, BLOCK_SIZE * 8, 1.0);
    let unwanted = tone(TONE_HZ + 200_000.0, SAMPLE_RATE as f32, BLOCK_SIZE * 8, 1.0);
    let input: Vec<Complex32> = wanted.iter().zip(&unwanted).map(|(&a, &b)| a + b).collect();
    println!("Input power: {:.3}", power(&input));

    decimator.set_shift_frequency(-TONE_HZ);
    let mut output = vec![Complex32::default(); BLOCK_SIZE / RATIO];
    for (i, block) in input.chunks(BLOCK_SIZE).enumerate() {
        let written = decimator.decimate(block, &mut output)?;
        println!(
            "  Block {i}: {written} samples, power {:.3}",
            power(&output[..written])
        );
    }

    if let Some(report) = decimator.engine().perf_report() {
        println!("\n{report}");
    }
    Ok(())
}
