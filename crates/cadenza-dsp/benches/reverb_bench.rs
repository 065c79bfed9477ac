//! Benchmarks for the reverb bank hot path.

use cadenza_dsp::{ReverbBank, ReverbSettings};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_reverb_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverb");

    for &frames in &[256usize, 512, 1024] {
        group.bench_function(format!("process_stereo_{frames}"), |b| {
            let mut bank = ReverbBank::new(&ReverbSettings::default(), 48000, 2);
            let mut buffer = vec![0.25f32; frames * 2];
            b.iter(|| {
                bank.process(black_box(&mut buffer), frames);
            });
        });
    }

    group.bench_function("update_settings", |b| {
        let mut bank = ReverbBank::new(&ReverbSettings::default(), 48000, 2);
        let settings = ReverbSettings {
            room_size: 0.8,
            damping: 0.3,
            ..ReverbSettings::default()
        };
        b.iter(|| {
            bank.update(black_box(&settings));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_reverb_process);
criterion_main!(benches);
