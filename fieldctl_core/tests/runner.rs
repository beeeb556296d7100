use fieldctl_core::mocks::ScriptedPort;
use fieldctl_core::{
    run_session, AnalogInputCfg, ControllerGains, ControllerLimits, FieldController,
    HallCalibration, HallConditioner, OperatorCommand, OperatorLink, Rig, SupplyDriver, TickCfg,
};
use fieldctl_traits::clock::TestClock;
use rstest::rstest;

fn rig() -> Rig<ScriptedPort> {
    let hall = HallConditioner::new(HallCalibration {
        offset_v: 0.0,
        tesla_per_volt: 1.0,
    });
    let controller = FieldController::new(
        ControllerGains {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
        },
        ControllerLimits {
            integral_min_v: -5.0,
            integral_max_v: 5.0,
            out_min_v: -10.0,
            out_max_v: 10.0,
            slew_v_per_s: 0.0,
            deriv_tau_s: 0.0,
            ramp_t_per_s: 0.0,
        },
    )
    .expect("controller build");
    let mut supply = SupplyDriver::new();
    supply.configure_analog_output(0, 0, -10.0, 10.0).unwrap();
    Rig::new(
        ScriptedPort::constant(0.0),
        AnalogInputCfg::default(),
        hall,
        controller,
        supply,
    )
}

#[rstest]
fn duration_bounds_the_session_deterministically() {
    let mut rig = rig();
    let clock = TestClock::new();
    let (link, rx) = OperatorLink::channel();

    let stats = run_session(
        &mut rig,
        &clock,
        TickCfg {
            rate_hz: 20,
            duration_s: Some(1.0),
        },
        &rx,
    )
    .unwrap();
    drop(link);

    // ticks at t = 0, 0.05, ..., 0.95 with the simulated clock
    assert_eq!(stats.ticks, 20);
    assert_eq!(stats.faults, 0);
    assert!(stats.last_sample.is_some());
}

#[rstest]
fn estop_lands_before_the_next_tick() {
    let mut rig = rig();
    rig.set_enabled(0.0, true).unwrap();
    rig.set_target(1.0);
    let clock = TestClock::new();

    let (link, rx) = OperatorLink::channel();
    assert!(link.estop());
    assert!(link.send(OperatorCommand::Stop));

    let stats = run_session(
        &mut rig,
        &clock,
        TickCfg {
            rate_hz: 20,
            duration_s: None,
        },
        &rx,
    )
    .unwrap();

    // both commands drained before any tick body ran
    assert_eq!(stats.ticks, 0);
    assert!(!rig.supply().is_enabled());
    assert_eq!(rig.port_mut().last_ao(), Some(0.0));
}

#[rstest]
fn operator_commands_mutate_the_rig() {
    let mut rig = rig();
    let clock = TestClock::new();
    let (link, rx) = OperatorLink::channel();
    link.send(OperatorCommand::SetTarget(0.42));
    link.send(OperatorCommand::SetEnabled(true));
    link.send(OperatorCommand::SetGains(ControllerGains {
        kp: 3.0,
        ki: 0.5,
        kd: 0.0,
    }));
    link.send(OperatorCommand::SetHallSensitivity(0.25));
    link.send(OperatorCommand::SetCurrentToField {
        b0_t: 0.001,
        tesla_per_amp: 0.04,
    });

    let stats = run_session(
        &mut rig,
        &clock,
        TickCfg {
            rate_hz: 20,
            duration_s: Some(0.25),
        },
        &rx,
    )
    .unwrap();
    drop(link);

    assert!(stats.ticks > 0);
    assert_eq!(rig.controller().target(), 0.42);
    assert_eq!(rig.controller().gains().kp, 3.0);
    assert_eq!(rig.hall().calibration().tesla_per_volt, 0.25);
    assert_eq!(rig.supply().calibration().1.tesla_per_amp, 0.04);
    assert!(rig.supply().is_enabled());
}

#[rstest]
fn disconnected_channel_stops_the_loop() {
    let mut rig = rig();
    let clock = TestClock::new();
    let (link, rx) = OperatorLink::channel();
    drop(link);

    let stats = run_session(
        &mut rig,
        &clock,
        TickCfg {
            rate_hz: 20,
            duration_s: None,
        },
        &rx,
    )
    .unwrap();
    assert_eq!(stats.ticks, 0);
}
