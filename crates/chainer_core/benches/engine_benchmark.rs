//! Processing unit benchmarks
//!
//! Measures performance of the full per-block path.

use chainer_core::{ChainerConfig, MidiEvent, MidiMessage, MultiChainer};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn benchmark_processor(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_chainer");

    // Typical buffer sizes used in real-time audio
    for buffer_size in [64, 128, 256, 512].iter() {
        let mut chainer = MultiChainer::new(ChainerConfig::default()).unwrap();
        chainer.prepare(48000.0, *buffer_size, 2);

        let mut left: Vec<f32> = (0..*buffer_size).map(|i| (i as f32 * 0.001).sin()).collect();
        let mut right = left.clone();
        let midi = [MidiEvent::new(MidiMessage::note_on(1, 36, 100), 0)];

        group.throughput(Throughput::Elements(*buffer_size as u64 * 2));
        group.bench_function(format!("process_{}_samples", buffer_size), |b| {
            b.iter(|| {
                chainer.process(&mut [&mut left[..], &mut right[..]], black_box(&midi), *buffer_size);
            })
        });
    }

    group.finish();
}

fn benchmark_low_latency(c: &mut Criterion) {
    let mut chainer = MultiChainer::new(ChainerConfig::low_latency()).unwrap();
    chainer.prepare_from_config();
    let mut left = vec![0.1_f32; 128];
    let mut right = vec![0.1_f32; 128];

    c.bench_function("low_latency_process_128_samples", |b| {
        b.iter(|| {
            chainer.process(&mut [&mut left[..], &mut right[..]], &[], black_box(128));
        })
    });
}

criterion_group!(benches, benchmark_processor, benchmark_low_latency);
criterion_main!(benches);
