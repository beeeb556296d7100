//! Per-tick telemetry assembly.

use chrono::{DateTime, Utc};

use crate::controller::ControlFrame;

/// One immutable telemetry row, produced once per control tick.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    /// Wall-clock stamp for the log row.
    pub t_utc: DateTime<Utc>,
    /// Monotonic seconds since the session started.
    pub elapsed_s: f64,
    pub v_hall: f64,
    pub b_meas_t: f64,
    /// The ramped setpoint the controller chased this tick.
    pub b_set_t: f64,
    /// Programming voltage actually written to the supply.
    pub v_cmd_v: f64,
    pub err_t: f64,
    pub p_v: f64,
    pub i_v: f64,
    pub d_v: f64,
    pub enabled: bool,
    pub saturated: bool,
    pub fault: bool,
}

/// Packages controller/probe/driver scalars into `Sample` records.
#[derive(Debug, Default, Clone, Copy)]
pub struct SamplePublisher;

impl SamplePublisher {
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        &self,
        t_utc: DateTime<Utc>,
        elapsed_s: f64,
        v_hall: f64,
        b_meas_t: f64,
        frame: &ControlFrame,
        v_cmd_v: f64,
        enabled: bool,
        fault: bool,
    ) -> Sample {
        Sample {
            t_utc,
            elapsed_s,
            v_hall,
            b_meas_t,
            b_set_t: frame.b_ramp_t,
            v_cmd_v,
            err_t: frame.err_t,
            p_v: frame.p_v,
            i_v: frame.i_v,
            d_v: frame.d_v,
            enabled,
            saturated: frame.saturated,
            fault,
        }
    }
}
