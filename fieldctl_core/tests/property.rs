use fieldctl_core::mocks::ScriptedPort;
use fieldctl_core::{ControllerGains, ControllerLimits, FieldController, SupplyDriver};
use proptest::prelude::*;

prop_compose! {
    fn request_walk()(
        len in 10usize..120,
        scale in 1.0f64..30.0,
        seed in any::<u64>(),
    ) -> Vec<f64> {
        // deterministic pseudo-random walk of requested voltages
        let mut v = Vec::with_capacity(len);
        let mut x = seed;
        for _ in 0..len {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let unit = (x >> 11) as f64 / (1u64 << 53) as f64; // [0, 1)
            v.push((unit * 2.0 - 1.0) * scale);
        }
        v
    }
}

proptest! {
    #[test]
    fn driver_writes_stay_clamped_and_slew_bounded(
        requests in request_walk(),
        slew in 0.5f64..50.0,
    ) {
        let mut port = ScriptedPort::default();
        let mut d = SupplyDriver::new();
        d.configure_analog_output(0, 0, -8.0, 8.0).unwrap();
        d.set_slew_limit(slew).unwrap();
        let mut now = 0.0;
        d.set_enabled(&mut port, now, true).unwrap();

        let mut last = 0.0;
        let dt = 0.05;
        for req in requests {
            now += dt;
            let v = d.command_program_voltage(&mut port, now, req).unwrap();
            prop_assert!((-8.0..=8.0).contains(&v), "write {v} escaped clamp");
            prop_assert!(
                (v - last).abs() <= slew * dt + 1e-9,
                "slew violated: {last} -> {v} with limit {slew}"
            );
            last = v;
        }
        for (_, v) in &port.ao_writes {
            prop_assert!((-8.0..=8.0).contains(v));
        }
    }

    #[test]
    fn controller_output_stays_within_clamp_and_slew(
        targets in request_walk(),
        meas in request_walk(),
        slew in 0.5f64..40.0,
    ) {
        let mut c = FieldController::new(
            ControllerGains { kp: 4.0, ki: 2.0, kd: 0.1 },
            ControllerLimits {
                integral_min_v: -3.0,
                integral_max_v: 3.0,
                out_min_v: -6.0,
                out_max_v: 6.0,
                slew_v_per_s: slew,
                deriv_tau_s: 0.02,
                ramp_t_per_s: 0.5,
            },
        ).unwrap();
        c.reset(0.0);
        let dt = 0.05;
        c.update(0.0, 0.0);

        let mut last_out = 0.0;
        let mut last_ramp = 0.0;
        for (k, (t, m)) in targets.iter().zip(meas.iter()).enumerate() {
            c.set_target(t * 0.1);
            let frame = c.update((k + 1) as f64 * dt, m * 0.01);
            prop_assert!((-6.0..=6.0).contains(&frame.v_out), "output escaped clamp");
            prop_assert!(
                (frame.v_out - last_out).abs() <= slew * dt + 1e-9,
                "output slew violated"
            );
            prop_assert!(
                (frame.b_ramp_t - last_ramp).abs() <= 0.5 * dt + 1e-12,
                "ramp rate violated"
            );
            last_out = frame.v_out;
            last_ramp = frame.b_ramp_t;
        }
    }

    #[test]
    fn prog_map_round_trips(
        v0 in -5.0f64..5.0,
        i0 in -10.0f64..10.0,
        apv in prop_oneof![(-4.0f64..-1e-9), (1e-9f64..4.0)],
        v in -10.0f64..10.0,
    ) {
        let mut d = SupplyDriver::new();
        d.set_prog_to_current(v0, i0, apv).unwrap();
        let back = d.current_to_program_voltage(d.prog_voltage_to_current(v));
        prop_assert!((back - v).abs() < 1e-6, "{v} -> {back} with slope {apv}");
    }
}
