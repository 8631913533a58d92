// Run with:  cargo bench --bench set_pixel

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle};
use std::hint::black_box;
use ws2812_rpi::{Color, PixelBuffer};

const LEDS: usize = 300;

fn set_pixel(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_pixel");
    group.throughput(Throughput::Elements(LEDS as u64));

    group.bench_function("set_color", |b| {
        let mut strip = PixelBuffer::new(LEDS);

        b.iter(|| {
            for i in 0..LEDS {
                black_box(&mut strip)
                    .set_color(black_box(i), black_box(Color::RED))
                    .unwrap();
            }
        });
    });

    group.bench_function("set_rgb", |b| {
        let mut strip = PixelBuffer::new(LEDS);

        b.iter(|| {
            for i in 0..LEDS {
                black_box(&mut strip)
                    .set_rgb(black_box(i), 0, black_box(i as u8), 255)
                    .unwrap();
            }
        });
    });

    group.bench_function("draw_line", |b| {
        let mut strip = PixelBuffer::new(LEDS);
        let line = Line::new(Point::zero(), Point::new(LEDS as i32 - 1, 0))
            .into_styled(PrimitiveStyle::with_stroke(Color::GREEN, 1));

        b.iter(|| {
            black_box(&line).draw(black_box(&mut strip)).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, set_pixel);
criterion_main!(benches);
