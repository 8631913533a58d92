// Run with:  cargo bench --bench encode_waveform

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use embedded_graphics::pixelcolor::RgbColor;
use std::hint::black_box;
use ws2812_rpi::{compute_max_leds, Color, Waveform};

fn encode_waveform(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_waveform");

    for leds in [10, 60, 150, compute_max_leds()] {
        let pixels: Vec<Color> = (0..leds)
            .map(|i| Color::new(i as u8, 255 - i as u8, (i * 7) as u8))
            .collect();
        group.throughput(Throughput::Elements(leds as u64));

        group.bench_with_input(BenchmarkId::new("full_brightness", leds), &pixels, |b, pixels| {
            let mut waveform = Box::new(Waveform::new());
            b.iter(|| black_box(&mut waveform).encode(black_box(pixels), black_box(1.0)));
        });

        group.bench_with_input(BenchmarkId::new("scaled", leds), &pixels, |b, pixels| {
            let mut waveform = Box::new(Waveform::new());
            b.iter(|| black_box(&mut waveform).encode(black_box(pixels), black_box(0.37)));
        });
    }

    group.bench_function("all_white_max_leds", |b| {
        let pixels = vec![Color::WHITE; compute_max_leds()];
        let mut waveform = Box::new(Waveform::new());
        b.iter(|| black_box(&mut waveform).encode(black_box(&pixels), black_box(1.0)));
    });

    group.finish();
}

criterion_group!(benches, encode_waveform);
criterion_main!(benches);
