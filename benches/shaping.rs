//! Criterion benches for the per-event hot paths: axis shaping and
//! combination arbitration.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use remapd::injection::axis;
use remapd::preset::Shaping;

use test_helpers::*;

fn bench_shape(c: &mut Criterion) {
    let shaping = Shaping {
        deadzone: 0.1,
        gain: 1.5,
        expo: 0.4,
        rel_rate: 60,
        rel_to_abs_input_cutoff: 100.0,
        release_timeout_ms: 50,
    };
    c.bench_function("axis_shape", |b| {
        let mut x = -1.0f64;
        b.iter(|| {
            x += 0.001;
            if x > 1.0 {
                x = -1.0;
            }
            black_box(axis::shape(black_box(x), &shaping))
        })
    });
}

fn bench_resolver_roundtrip(c: &mut Criterion) {
    c.bench_function("combination_press_release", |b| {
        let mut h = EngineHarness::new(preset(vec![
            key_mapping(&[KEY_A], 20),
            key_mapping(&[KEY_A, KEY_S], 21),
            key_mapping(&[KEY_LEFTSHIFT, KEY_A, KEY_S], 22),
        ]));
        let mut t = 0u64;
        b.iter(|| {
            t += 4_000;
            h.feed(key_ev(t, KEY_A, 1));
            h.feed(key_ev(t + 1_000, KEY_S, 1));
            h.feed(key_ev(t + 2_000, KEY_S, 0));
            h.feed(key_ev(t + 3_000, KEY_A, 0));
            black_box(h.sink.take().len())
        })
    });
}

criterion_group!(benches, bench_shape, bench_resolver_roundtrip);
criterion_main!(benches);
