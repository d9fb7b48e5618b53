//! Integration tests for the GPU shift-decimator strategies.
//!
//! Every test returns early when no Vulkan device is available.

use rustfft::FftPlanner;
use spectrum_gpu::dsp::signal::white_noise;
use spectrum_gpu::dsp::{as_complex, as_interleaved, Complex32};
use spectrum_gpu::engine::MultiQueueShiftDecimator;
use spectrum_gpu::gpu::{Context, ContextConfig};
use spectrum_gpu::{
    GpuShiftDecimator, ReferenceShiftDecimator, Scheduling, ShiftDecimate, ShiftDecimator,
    ShiftDecimatorConfig, ShiftDecimatorError, Taps,
};
use std::f32::consts::TAU;
use std::sync::Arc;

const TOLERANCE: f32 = 1e-3;
const MAX_BLOCK: usize = 8192;

fn create_gpu_context() -> Option<Arc<Context>> {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::new(&ContextConfig::from_env()).ok()
}

fn test_config(scheduling: Scheduling) -> ShiftDecimatorConfig {
    ShiftDecimatorConfig {
        max_block_size: MAX_BLOCK,
        scheduling,
        counter_window: 4,
        ..Default::default()
    }
}

/// Feed `blocks` through `decimator`, returning each call's output.
fn run(
    decimator: &mut dyn ShiftDecimate,
    blocks: &[Vec<Complex32>],
    omega: f32,
) -> Vec<Vec<Complex32>> {
    let mut phi = 0.0f32;
    blocks
        .iter()
        .map(|block| {
            // room for a larger previous block's output
            let mut samples = as_interleaved(block).to_vec();
            samples.resize(2 * block.len().max(MAX_BLOCK), 0.0);
            let written = decimator
                .process(&mut samples, block.len(), phi, omega)
                .expect("process failed");
            phi = (phi + omega * block.len() as f32).rem_euclid(TAU);
            as_complex(&samples)[..written].to_vec()
        })
        .collect()
}

fn assert_close(got: &[Complex32], expected: &[Complex32], context: &str) {
    assert_eq!(got.len(), expected.len(), "{context}: length");
    for (i, (a, b)) in got.iter().zip(expected).enumerate() {
        assert!(
            (a.re - b.re).abs() < TOLERANCE && (a.im - b.im).abs() < TOLERANCE,
            "{context}: sample {i}: {a:?} vs {b:?}"
        );
    }
}

fn noise_blocks(count: usize, len: usize) -> Vec<Vec<Complex32>> {
    (0..count)
        .map(|i| white_noise(len, 1.0, 1000 + i as u64))
        .collect()
}

#[test]
fn test_moving_average_scenario() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let taps = Taps::new(vec![vec![0.25, 0.5, 0.25]]).unwrap();
    let mut gpu = ShiftDecimator::new(&ctx, taps.clone(), &test_config(Scheduling::SingleQueue))
        .expect("Failed to create shift-decimator");
    let mut reference = ReferenceShiftDecimator::new(taps);

    let first: Vec<Complex32> = (0..256).map(|i| Complex32::new(i as f32 / 256.0, 0.5)).collect();
    let second = white_noise(256, 1.0, 3);

    let outputs = run(&mut gpu, &[first.clone(), second], 0.0);
    // cold start
    assert_eq!(outputs[0], vec![Complex32::default(); 128]);
    assert_close(&outputs[1], &reference.process_block(&first, 0.0, 0.0), "block 0");
}

#[test]
fn test_matches_reference_one_call_later() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let taps = Taps::half_band_cascade(8).unwrap();
    let mut gpu = ShiftDecimator::new(&ctx, taps.clone(), &test_config(Scheduling::Auto)).unwrap();
    assert_eq!(gpu.latency(), 1);

    let blocks = noise_blocks(6, 2048);
    let omega = 0.05;
    let outputs = run(&mut gpu, &blocks, omega);

    let mut reference = ReferenceShiftDecimator::new(taps);
    let expected = run(&mut reference, &blocks, omega);
    for k in 1..blocks.len() {
        assert_close(&outputs[k], &expected[k - 1], &format!("call {k}"));
    }
}

#[test]
fn test_single_and_multi_queue_are_identical() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    if ctx.queue_count() < 2 {
        return;
    }
    let taps = Taps::half_band_cascade(16).unwrap();
    let blocks = noise_blocks(8, 4096);

    let mut single =
        ShiftDecimator::new(&ctx, taps.clone(), &test_config(Scheduling::SingleQueue)).unwrap();
    let mut multi = ShiftDecimator::new(&ctx, taps, &test_config(Scheduling::MultiQueue)).unwrap();
    assert_eq!(single.scheduling(), Scheduling::SingleQueue);
    assert_eq!(multi.scheduling(), Scheduling::MultiQueue);

    assert_eq!(run(&mut single, &blocks, 0.02), run(&mut multi, &blocks, 0.02));
}

#[test]
fn test_multi_queue_with_one_stage() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let taps = Taps::half_band_cascade(2).unwrap();
    let mut gpu = ShiftDecimator::new(&ctx, taps.clone(), &test_config(Scheduling::MultiQueue)).unwrap();

    let blocks = noise_blocks(4, 1024);
    let outputs = run(&mut gpu, &blocks, -0.3);
    let expected = run(&mut ReferenceShiftDecimator::new(taps), &blocks, -0.3);
    for k in 1..blocks.len() {
        assert_close(&outputs[k], &expected[k - 1], &format!("call {k}"));
    }
}

#[test]
fn test_reconstruction_reproduces_output() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let taps = Taps::half_band_cascade(4).unwrap();
    let blocks = noise_blocks(5, 1024);
    let config = test_config(Scheduling::SingleQueue);

    let first = {
        let mut gpu = ShiftDecimator::new(&ctx, taps.clone(), &config).unwrap();
        run(&mut gpu, &blocks, 0.1)
    };
    let mut gpu = ShiftDecimator::new(&ctx, taps, &config).unwrap();
    assert_eq!(run(&mut gpu, &blocks, 0.1), first);
}

#[test]
fn test_variable_block_size() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let taps = Taps::half_band_cascade(4).unwrap();
    let mut gpu = ShiftDecimator::new(&ctx, taps.clone(), &test_config(Scheduling::Auto)).unwrap();
    let blocks = vec![
        white_noise(2048, 1.0, 1),
        white_noise(512, 1.0, 2),
        white_noise(4096, 1.0, 3),
        white_noise(512, 1.0, 4),
    ];

    let outputs = run(&mut gpu, &blocks, 0.0);
    let lengths: Vec<usize> = outputs.iter().map(Vec::len).collect();
    assert_eq!(lengths, vec![512, 512, 128, 1024]);

    let expected = run(&mut ReferenceShiftDecimator::new(taps), &blocks, 0.0);
    for k in 1..blocks.len() {
        assert_close(&outputs[k], &expected[k - 1], &format!("call {k}"));
    }
}

#[test]
fn test_invalid_calls_do_not_poison() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let taps = Taps::half_band_cascade(4).unwrap();
    let mut gpu = ShiftDecimator::new(&ctx, taps, &test_config(Scheduling::Auto)).unwrap();

    let mut samples = vec![0.0f32; 2 * 8192];
    assert!(matches!(
        gpu.process(&mut samples, 100, 0.0, 0.0),
        Err(ShiftDecimatorError::Misaligned { count: 100, multiple: 256 })
    ));
    assert!(matches!(
        gpu.process(&mut samples, 16384, 0.0, 0.0),
        Err(ShiftDecimatorError::BlockTooLarge { .. })
    ));
    assert!(matches!(
        gpu.process(&mut samples[..100], 256, 0.0, 0.0),
        Err(ShiftDecimatorError::BufferTooSmall { needed: 512, len: 100 })
    ));
    assert!(!gpu.is_poisoned());
    assert_eq!(gpu.process(&mut samples, 256, 0.0, 0.0).unwrap(), 64);
}

#[test]
fn test_perf_report_after_window() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let taps = Taps::half_band_cascade(4).unwrap();
    let mut gpu = ShiftDecimator::new(&ctx, taps, &test_config(Scheduling::Auto)).unwrap();
    assert!(gpu.perf_report().is_none());

    run(&mut gpu, &noise_blocks(4, 1024), 0.0);
    let report = gpu.perf_report().expect("report after one window");
    assert_eq!(report.calls, 4);
    assert_eq!(report.strategy, gpu.name());
    assert_eq!(report.total_us.samples, 4);
    let expected_fences = match gpu.scheduling() {
        Scheduling::MultiQueue => 1,
        _ => 2,
    };
    assert_eq!(report.fence_waits.len(), expected_fences);
    assert!(report.fence_waits.iter().all(|wait| wait.wait_us.samples == 4));
}

#[test]
fn test_multi_queue_falls_back_on_one_queue() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ContextConfig {
        max_queues: 1,
        ..ContextConfig::from_env()
    };
    let Ok(ctx) = Context::new(&config) else {
        return;
    };
    assert_eq!(ctx.queue_count(), 1);

    let taps = Taps::half_band_cascade(4).unwrap();
    let gpu = ShiftDecimator::new(&ctx, taps.clone(), &test_config(Scheduling::MultiQueue)).unwrap();
    assert_eq!(gpu.scheduling(), Scheduling::SingleQueue);

    assert!(matches!(
        MultiQueueShiftDecimator::new(&ctx, taps, &test_config(Scheduling::MultiQueue)),
        Err(ShiftDecimatorError::InvalidConfig(_))
    ));
}

#[test]
fn test_short_output_buffer_keeps_pending_block() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let ratio = 8;
    let mut decimator =
        GpuShiftDecimator::new(&ctx, 48000, ratio, &test_config(Scheduling::Auto)).unwrap();
    decimator.set_shift_frequency(1000.0);
    let omega = decimator.shift().1;

    let first = white_noise(4096, 1.0, 11);
    let second = white_noise(512, 1.0, 12);
    let mut output = vec![Complex32::default(); 4096 / ratio];
    assert_eq!(decimator.decimate(&first, &mut output).unwrap(), 512);
    assert_eq!(decimator.engine().pending_output_len(512), 512);

    // the first block's 512 outputs do not fit in 64
    assert!(matches!(
        decimator.decimate(&second, &mut output[..64]),
        Err(ShiftDecimatorError::BufferTooSmall { needed: 1024, len: 128 })
    ));
    assert!(!decimator.engine().is_poisoned());
    let (phi, _) = decimator.shift();
    assert!((phi - (omega * 4096.0).rem_euclid(TAU)).abs() < 1e-6);

    // nothing was submitted, so the retry still returns the first block
    let written = decimator.decimate(&second, &mut output).unwrap();
    assert_eq!(written, 512);

    let taps = Taps::half_band_cascade(ratio).unwrap();
    let expected = ReferenceShiftDecimator::new(taps).process_block(&first, 0.0, omega);
    assert_close(&output[..written], &expected, "retry");
}

#[test]
fn test_gpu_shift_decimator_places_tone() {
    let Some(ctx) = create_gpu_context() else {
        return;
    };
    let sample_rate = 48000;
    let ratio = 8;
    let mut decimator =
        GpuShiftDecimator::new(&ctx, sample_rate, ratio, &test_config(Scheduling::Auto)).unwrap();
    assert_eq!(decimator.output_rate(), 6000.0);

    // 10 kHz shifted down by 9 kHz lands at 1 kHz
    let input = spectrum_gpu::dsp::signal::tone(10000.0, sample_rate as f32, 8 * 4096, 1.0);
    decimator.set_shift_frequency(-9000.0);

    let mut collected = Vec::new();
    let mut output = vec![Complex32::default(); 4096 / ratio];
    for block in input.chunks(4096) {
        let written = decimator.decimate(block, &mut output).unwrap();
        collected.extend_from_slice(&output[..written]);
    }
    // drop the cold-start block and the filter warm-up
    let mut buffer = collected[1024..2048].to_vec();
    FftPlanner::new().plan_fft_forward(buffer.len()).process(&mut buffer);
    let peak_bin = buffer
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.norm().partial_cmp(&b.1.norm()).unwrap())
        .map(|(i, _)| i)
        .unwrap();

    let bin_hz = 6000.0 / 1024.0;
    let peak_hz = peak_bin as f32 * bin_hz;
    assert!(
        (peak_hz - 1000.0).abs() < 2.0 * bin_hz,
        "Expected peak near 1000 Hz, got {peak_hz} Hz"
    );
}
