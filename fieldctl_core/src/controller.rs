//! Setpoint-ramping PID field controller.
//!
//! Each `update` runs three phases: ramp the setpoint toward the target,
//! compute the PID terms with the derivative taken on the measurement and
//! low-pass filtered, then compose the output with feedforward, saturation,
//! conditional-integration anti-windup and a slew limit.

use crate::error::{FieldError, Result};

/// Volt-level tolerance deciding saturation and anti-windup boundaries.
const ANTI_WINDUP_EPS_V: f64 = 1e-12;

/// Floor on dt to avoid division by zero and spurious derivatives when the
/// loop is invoked faster than the clock resolution.
const DT_FLOOR_S: f64 = 1e-6;

/// PID gains in supply-programming volts per field unit.
#[derive(Debug, Clone, Copy)]
pub struct ControllerGains {
    /// V/T
    pub kp: f64,
    /// V/(T·s)
    pub ki: f64,
    /// V·s/T
    pub kd: f64,
}

impl Default for ControllerGains {
    fn default() -> Self {
        Self {
            kp: 5.0,
            ki: 1.0,
            kd: 0.0,
        }
    }
}

/// Output shaping limits and rates.
#[derive(Debug, Clone, Copy)]
pub struct ControllerLimits {
    /// Clamp on the integrator's output contribution, volts.
    pub integral_min_v: f64,
    pub integral_max_v: f64,
    /// Clamp on the composed output, volts.
    pub out_min_v: f64,
    pub out_max_v: f64,
    /// Output slew in V/s; 0 disables slew limiting.
    pub slew_v_per_s: f64,
    /// Derivative low-pass time constant, seconds; 0 disables filtering.
    pub deriv_tau_s: f64,
    /// Setpoint ramp rate in T/s; 0 snaps to target.
    pub ramp_t_per_s: f64,
}

impl Default for ControllerLimits {
    fn default() -> Self {
        Self {
            integral_min_v: -5.0,
            integral_max_v: 5.0,
            out_min_v: -10.0,
            out_max_v: 10.0,
            slew_v_per_s: 0.0,
            deriv_tau_s: 0.02,
            ramp_t_per_s: 0.1,
        }
    }
}

/// Open-loop feedforward added to the PID output: V = V0 + B_ramp * (V/T).
#[derive(Debug, Clone, Copy, Default)]
pub struct Feedforward {
    pub enabled: bool,
    pub v0_v: f64,
    pub volts_per_tesla: f64,
}

/// Everything one `update` produced, for actuation and telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFrame {
    pub b_ramp_t: f64,
    pub err_t: f64,
    pub p_v: f64,
    pub i_v: f64,
    pub d_v: f64,
    pub ff_v: f64,
    pub v_unsat: f64,
    pub v_sat: f64,
    pub v_out: f64,
    pub saturated: bool,
}

/// Ramped-setpoint PID controller producing a supply programming voltage.
#[derive(Debug, Clone)]
pub struct FieldController {
    gains: ControllerGains,
    limits: ControllerLimits,
    ff: Feedforward,

    target_t: f64,
    ramp_t: f64,
    // Committed integrator state, T·s. The output clamp bounds only the
    // contribution, never this accumulator.
    integral_ts: f64,
    deriv_filt_tps: f64,
    prev_meas_t: f64,
    last_out_v: f64,
    last_t_s: f64,
    has_last: bool,
}

fn validate_gains(g: &ControllerGains) -> Result<()> {
    if !(g.kp.is_finite() && g.ki.is_finite() && g.kd.is_finite()) {
        return Err(eyre::Report::new(FieldError::Configuration(
            "controller gains must be finite".into(),
        )));
    }
    Ok(())
}

fn validate_limits(l: &ControllerLimits) -> Result<()> {
    if !(l.integral_max_v > l.integral_min_v) {
        return Err(eyre::Report::new(FieldError::Configuration(format!(
            "integral clamp [{}, {}] V must satisfy max > min",
            l.integral_min_v, l.integral_max_v
        ))));
    }
    if !(l.out_max_v > l.out_min_v) {
        return Err(eyre::Report::new(FieldError::Configuration(format!(
            "output clamp [{}, {}] V must satisfy max > min",
            l.out_min_v, l.out_max_v
        ))));
    }
    if !l.slew_v_per_s.is_finite() || l.slew_v_per_s < 0.0 {
        return Err(eyre::Report::new(FieldError::Configuration(format!(
            "output slew {} V/s must be >= 0",
            l.slew_v_per_s
        ))));
    }
    if !l.deriv_tau_s.is_finite() || l.deriv_tau_s < 0.0 {
        return Err(eyre::Report::new(FieldError::Configuration(format!(
            "derivative tau {} s must be >= 0",
            l.deriv_tau_s
        ))));
    }
    if !l.ramp_t_per_s.is_finite() || l.ramp_t_per_s < 0.0 {
        return Err(eyre::Report::new(FieldError::Configuration(format!(
            "ramp rate {} T/s must be >= 0",
            l.ramp_t_per_s
        ))));
    }
    Ok(())
}

impl FieldController {
    pub fn new(gains: ControllerGains, limits: ControllerLimits) -> Result<Self> {
        validate_gains(&gains)?;
        validate_limits(&limits)?;
        Ok(Self {
            gains,
            limits,
            ff: Feedforward::default(),
            target_t: 0.0,
            ramp_t: 0.0,
            integral_ts: 0.0,
            deriv_filt_tps: 0.0,
            prev_meas_t: 0.0,
            last_out_v: 0.0,
            last_t_s: 0.0,
            has_last: false,
        })
    }

    pub fn gains(&self) -> &ControllerGains {
        &self.gains
    }

    pub fn limits(&self) -> &ControllerLimits {
        &self.limits
    }

    pub fn feedforward(&self) -> &Feedforward {
        &self.ff
    }

    pub fn set_gains(&mut self, gains: ControllerGains) -> Result<()> {
        validate_gains(&gains)?;
        self.gains = gains;
        Ok(())
    }

    pub fn set_limits(&mut self, limits: ControllerLimits) -> Result<()> {
        validate_limits(&limits)?;
        self.limits = limits;
        Ok(())
    }

    pub fn set_feedforward(&mut self, ff: Feedforward) {
        self.ff = ff;
    }

    /// Operator setpoint in Tesla; the internal ramp chases it.
    pub fn set_target(&mut self, tesla: f64) {
        self.target_t = tesla;
    }

    pub fn target(&self) -> f64 {
        self.target_t
    }

    pub fn ramped_setpoint(&self) -> f64 {
        self.ramp_t
    }

    pub fn last_output(&self) -> f64 {
        self.last_out_v
    }

    /// Re-seed the controller around `b_initial`: target and ramp move to it,
    /// integrator / derivative / output / timing state are cleared.
    pub fn reset(&mut self, b_initial: f64) {
        self.target_t = b_initial;
        self.ramp_t = b_initial;
        self.integral_ts = 0.0;
        self.deriv_filt_tps = 0.0;
        self.prev_meas_t = 0.0;
        self.last_out_v = 0.0;
        self.last_t_s = 0.0;
        self.has_last = false;
    }

    /// One control step at monotonic time `t_s` with measured field `b_meas`.
    ///
    /// The first call after construction or `reset` only records timing
    /// state and emits a zero-volt frame; ramping and PID start on the
    /// second call.
    pub fn update(&mut self, t_s: f64, b_meas: f64) -> ControlFrame {
        if !self.has_last {
            self.has_last = true;
            self.last_t_s = t_s;
            self.prev_meas_t = b_meas;
            self.last_out_v = 0.0;
            return ControlFrame {
                b_ramp_t: self.ramp_t,
                err_t: self.ramp_t - b_meas,
                ..ControlFrame::default()
            };
        }

        let dt = (t_s - self.last_t_s).max(DT_FLOOR_S);
        let l = &self.limits;

        // Phase 1: ramp the setpoint.
        if l.ramp_t_per_s > 0.0 {
            let step_max = l.ramp_t_per_s * dt;
            self.ramp_t += (self.target_t - self.ramp_t).clamp(-step_max, step_max);
        } else {
            self.ramp_t = self.target_t;
        }
        let err = self.ramp_t - b_meas;

        // Phase 2: PID terms. Derivative on measurement, not on error, so a
        // setpoint step produces no derivative kick.
        let d_meas = (b_meas - self.prev_meas_t) / dt;
        let d_err = -d_meas;
        if l.deriv_tau_s > 0.0 {
            let alpha = dt / (l.deriv_tau_s + dt);
            self.deriv_filt_tps += alpha * (d_err - self.deriv_filt_tps);
        } else {
            self.deriv_filt_tps = d_err;
        }
        let p_v = self.gains.kp * err;
        let d_v = self.gains.kd * self.deriv_filt_tps;

        let candidate_accum = self.integral_ts + err * dt;
        let i_v = (self.gains.ki * candidate_accum).clamp(l.integral_min_v, l.integral_max_v);

        let ff_v = if self.ff.enabled {
            self.ff.v0_v + self.ramp_t * self.ff.volts_per_tesla
        } else {
            0.0
        };

        // Phase 3: compose, saturate, anti-windup, slew.
        let v_unsat = ff_v + p_v + i_v + d_v;
        let v_sat = v_unsat.clamp(l.out_min_v, l.out_max_v);
        let saturated = (v_unsat - v_sat).abs() > ANTI_WINDUP_EPS_V;

        // Conditional integration: commit the raw accumulator unless the
        // output sits on a rail in the direction the error keeps pushing.
        // Rail checks come first so riding the rail exactly (v_unsat ==
        // v_sat == out_max) still freezes; a reversed error is always
        // allowed to unwind.
        let sat_high = v_sat >= l.out_max_v - ANTI_WINDUP_EPS_V;
        let sat_low = v_sat <= l.out_min_v + ANTI_WINDUP_EPS_V;
        let permit = if sat_high {
            err <= 0.0
        } else if sat_low {
            err >= 0.0
        } else {
            !saturated
        };
        if dt > 0.0 && permit {
            self.integral_ts = candidate_accum;
        }

        let v_out = if l.slew_v_per_s > 0.0 {
            let step_max = l.slew_v_per_s * dt;
            (self.last_out_v + (v_sat - self.last_out_v).clamp(-step_max, step_max))
                .clamp(l.out_min_v, l.out_max_v)
        } else {
            v_sat
        };

        self.last_out_v = v_out;
        self.prev_meas_t = b_meas;
        self.last_t_s = t_s;

        ControlFrame {
            b_ramp_t: self.ramp_t,
            err_t: err,
            p_v,
            i_v,
            d_v,
            ff_v,
            v_unsat,
            v_sat,
            v_out,
            saturated,
        }
    }
}

#[cfg(test)]
mod ramp_tests {
    use super::*;

    fn controller(ramp: f64) -> FieldController {
        let mut c = FieldController::new(
            ControllerGains {
                kp: 5.0,
                ki: 0.0,
                kd: 0.0,
            },
            ControllerLimits {
                ramp_t_per_s: ramp,
                ..ControllerLimits::default()
            },
        )
        .unwrap();
        c.reset(0.0);
        c.update(0.0, 0.0); // prime timing state
        c
    }

    #[test]
    fn ramp_steps_are_bounded() {
        let mut c = controller(0.1);
        c.set_target(1.0);
        for k in 1..=10 {
            let frame = c.update(k as f64 * 0.1, 0.0);
            let expected = 0.01 * k as f64;
            assert!((frame.b_ramp_t - expected).abs() < 1e-12, "tick {k}");
        }
    }

    #[test]
    fn zero_ramp_rate_snaps_to_target() {
        let mut c = controller(0.0);
        c.set_target(0.7);
        let frame = c.update(0.1, 0.0);
        assert_eq!(frame.b_ramp_t, 0.7);
    }
}
