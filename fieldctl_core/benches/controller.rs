use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use fieldctl_core::{ControllerGains, ControllerLimits, FieldController};

// Synthetic measurement trace: sine with additive white noise
fn synth_field(n: usize, noise_amp: f64, seed: u32) -> Vec<f64> {
    // tiny PRNG
    let mut state = seed.max(1);
    let mut next_f64 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        (x as f64) / (u32::MAX as f64 + 1.0)
    };
    let mut v = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f64 * 0.05;
        let b = 0.2 * (0.1 * t).sin();
        let noise = (next_f64() * 2.0 - 1.0) * noise_amp;
        v.push(b + noise);
    }
    v
}

fn fresh_controller() -> FieldController {
    let mut c = FieldController::new(
        ControllerGains {
            kp: 5.0,
            ki: 2.0,
            kd: 0.1,
        },
        ControllerLimits {
            integral_min_v: -5.0,
            integral_max_v: 5.0,
            out_min_v: -10.0,
            out_max_v: 10.0,
            slew_v_per_s: 20.0,
            deriv_tau_s: 0.02,
            ramp_t_per_s: 0.1,
        },
    )
    .expect("controller build");
    c.reset(0.0);
    c.set_target(0.25);
    c
}

pub fn bench_update(c: &mut Criterion) {
    let mut g = c.benchmark_group("controller_update");
    g.sample_size(50);

    let trace = synth_field(10_000, 0.002, 0xC0FFEE);

    g.bench_function("pid_tick_10k", |b| {
        b.iter_batched(
            fresh_controller,
            |mut ctl| {
                for (k, b_meas) in trace.iter().enumerate() {
                    let frame = ctl.update(k as f64 * 0.05, black_box(*b_meas));
                    black_box(frame.v_out);
                }
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

criterion_group!(controller, bench_update);
criterion_main!(controller);
