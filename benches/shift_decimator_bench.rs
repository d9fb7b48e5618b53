//! Benchmarks for the reference and GPU shift-decimators.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spectrum_gpu::dsp::as_interleaved;
use spectrum_gpu::dsp::signal::white_noise;
use spectrum_gpu::{
    Context, ContextConfig, ReferenceShiftDecimator, Scheduling, ShiftDecimate, ShiftDecimator,
    ShiftDecimatorConfig, Taps,
};

const BLOCK_SIZE: usize = 64 * 1024;
const OMEGA: f32 = 0.01;

fn bench_reference(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reference Shift-Decimator");
    let input = white_noise(BLOCK_SIZE, 1.0, 42);

    for ratio in [4, 16, 64] {
        let taps = Taps::half_band_cascade(ratio).unwrap();
        group.throughput(Throughput::Elements(BLOCK_SIZE as u64));
        group.bench_with_input(BenchmarkId::new("process_block", ratio), &taps, |b, taps| {
            let mut reference = ReferenceShiftDecimator::new(taps.clone());
            b.iter(|| black_box(reference.process_block(&input, 0.0, OMEGA)));
        });
    }

    group.finish();
}

fn bench_gpu(c: &mut Criterion) {
    let Ok(context) = Context::new(&ContextConfig::default()) else {
        eprintln!("No Vulkan device, skipping GPU benchmarks");
        return;
    };
    let mut group = c.benchmark_group("GPU Shift-Decimator");
    let input = white_noise(BLOCK_SIZE, 1.0, 42);

    for scheduling in [Scheduling::SingleQueue, Scheduling::MultiQueue] {
        if scheduling == Scheduling::MultiQueue && context.queue_count() < 2 {
            continue;
        }
        for ratio in [4, 16, 64] {
            let config = ShiftDecimatorConfig {
                max_block_size: BLOCK_SIZE,
                scheduling,
                perf_counters: false,
                ..Default::default()
            };
            let taps = Taps::half_band_cascade(ratio).unwrap();
            let mut engine = ShiftDecimator::new(&context, taps, &config).unwrap();
            let mut samples = as_interleaved(&input).to_vec();

            group.throughput(Throughput::Elements(BLOCK_SIZE as u64));
            group.bench_function(BenchmarkId::new(engine.name(), ratio), |b| {
                b.iter(|| {
                    samples.copy_from_slice(as_interleaved(&input));
                    black_box(engine.process(&mut samples, BLOCK_SIZE, 0.0, OMEGA).unwrap())
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_reference, bench_gpu);
criterion_main!(benches);
