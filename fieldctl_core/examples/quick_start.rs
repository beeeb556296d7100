//! Quick Start Example
//!
//! Runs a short closed-loop session against the simulated magnet bench and
//! prints the measured field as the loop converges on 0.1 T.
//!
//! Run with `cargo run -p fieldctl_core --example quick_start`.

use fieldctl_core::{
    run_session, AnalogInputCfg, ControllerGains, ControllerLimits, FieldController,
    HallCalibration, HallConditioner, OperatorLink, Rig, SupplyDriver, TickCfg,
};
use fieldctl_hardware::SimulatedBench;
use fieldctl_traits::MonotonicClock;

fn main() -> Result<(), eyre::Report> {
    // Bench defaults: 2 A/V supply, 0.05 T/A coil, 10 V/T probe.
    let bench = SimulatedBench::default();

    let hall = HallConditioner::new(HallCalibration {
        offset_v: 0.0,
        tesla_per_volt: 0.1,
    });

    let mut supply = SupplyDriver::new();
    supply.configure_analog_output(0, 0, -10.0, 10.0)?;
    supply.set_prog_to_current(0.0, 0.0, 2.0)?;
    supply.set_current_to_field(0.0, 0.05);

    let controller = FieldController::new(
        ControllerGains {
            kp: 30.0,
            ki: 15.0,
            kd: 0.0,
        },
        ControllerLimits {
            integral_min_v: -8.0,
            integral_max_v: 8.0,
            out_min_v: -10.0,
            out_max_v: 10.0,
            slew_v_per_s: 0.0,
            deriv_tau_s: 0.02,
            ramp_t_per_s: 0.5,
        },
    )?;

    let mut rig = Rig::new(bench, AnalogInputCfg::default(), hall, controller, supply);
    rig.set_enabled(0.0, true)?;
    rig.set_target(0.1);

    // Keep the link alive for the whole run; dropping it stops the loop.
    let (link, rx) = OperatorLink::channel();
    let stats = run_session(
        &mut rig,
        &MonotonicClock::new(),
        TickCfg {
            rate_hz: 20,
            duration_s: Some(2.0),
        },
        &rx,
    )?;
    drop(link);

    rig.set_enabled(2.0, false)?;
    if let Some(s) = stats.last_sample {
        println!(
            "settled at {:.4} T after {} ticks ({} faults)",
            s.b_meas_t, stats.ticks, stats.faults
        );
    }
    Ok(())
}
