//! The per-tick pipeline: acquisition → conditioning → control → actuation
//! → telemetry, with every hardware error downgraded to the sample's fault
//! flag so the loop keeps ticking.

use chrono::Utc;
use fieldctl_traits::{AnalogIo, DigitalIo};

use crate::controller::{ControllerGains, ControllerLimits, Feedforward, FieldController};
use crate::error::Result;
use crate::hall::{AnalogInputCfg, FilterMode, HallConditioner};
use crate::logger::{
    CalibrationMeta, ControllerMeta, HallMeta, KepcoMeta, SessionLogger, SessionMeta,
};
use crate::supply::SupplyDriver;
use crate::telemetry::{Sample, SamplePublisher};

/// Owns the I/O port and the three control subsystems; `tick` runs one
/// strictly-ordered control cycle.
pub struct Rig<P> {
    io: P,
    ai: AnalogInputCfg,
    hall: HallConditioner,
    controller: FieldController,
    supply: SupplyDriver,
    logger: SessionLogger,
    publisher: SamplePublisher,

    last_tick_s: Option<f64>,
    last_v_hall: f64,
    last_b_meas: f64,
    // Set after a log_sample failure; cleared by reopening a session.
    log_suppressed: bool,
}

impl<P: AnalogIo + DigitalIo> Rig<P> {
    pub fn new(
        io: P,
        ai: AnalogInputCfg,
        hall: HallConditioner,
        controller: FieldController,
        supply: SupplyDriver,
    ) -> Self {
        Self {
            io,
            ai,
            hall,
            controller,
            supply,
            logger: SessionLogger::new(),
            publisher: SamplePublisher,
            last_tick_s: None,
            last_v_hall: 0.0,
            last_b_meas: 0.0,
            log_suppressed: false,
        }
    }

    /// One control cycle at monotonic `now_s` seconds since session start.
    ///
    /// Never fails: I/O errors latch the fault flag on the returned sample,
    /// force-disable the supply (0 V best-effort) and leave the loop alive.
    pub fn tick(&mut self, now_s: f64) -> Sample {
        let dt = match self.last_tick_s {
            Some(t) => (now_s - t).max(0.0),
            None => 0.0,
        };
        self.last_tick_s = Some(now_s);
        let mut fault = false;

        // 1) acquisition + conditioning; hold the last measurement on a
        //    read fault so the controller state stays continuous.
        let (v_hall, b_meas) = match self.hall.read_field(&mut self.io, &self.ai, dt) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "hall read failed, forcing supply off");
                fault = true;
                self.force_disable(now_s);
                (self.last_v_hall, self.last_b_meas)
            }
        };
        self.last_v_hall = v_hall;
        self.last_b_meas = b_meas;

        // 2) control
        let frame = self.controller.update(now_s, b_meas);

        // 3) actuation; the driver refuses while disabled, so only attempt
        //    when enabled.
        let v_cmd = if self.supply.is_enabled() {
            match self
                .supply
                .command_program_voltage(&mut self.io, now_s, frame.v_out)
            {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "supply command failed, forcing supply off");
                    fault = true;
                    self.force_disable(now_s);
                    self.supply.last_program_voltage()
                }
            }
        } else {
            self.supply.last_program_voltage()
        };

        // 4) telemetry
        let mut sample = self.publisher.assemble(
            Utc::now(),
            now_s,
            v_hall,
            b_meas,
            &frame,
            v_cmd,
            self.supply.is_enabled(),
            fault,
        );
        if self.logger.is_open() && !self.log_suppressed {
            if let Err(e) = self.logger.log_sample(&sample) {
                tracing::warn!(error = %e, "log_sample failed, suppressing until reopen");
                self.log_suppressed = true;
                sample.fault = true;
            }
        }
        sample
    }

    /// Best-effort disable used on fault paths and E-stop.
    fn force_disable(&mut self, now_s: f64) {
        if let Err(e) = self.supply.set_enabled(&mut self.io, now_s, false) {
            tracing::error!(error = %e, "force-disable write failed");
        }
    }

    // ── operator surface ────────────────────────────────────────────────

    pub fn set_target(&mut self, tesla: f64) {
        self.controller.set_target(tesla);
    }

    pub fn set_enabled(&mut self, now_s: f64, enabled: bool) -> Result<()> {
        self.supply.set_enabled(&mut self.io, now_s, enabled)
    }

    /// Emergency stop: force the supply off immediately, best-effort.
    pub fn estop(&mut self, now_s: f64) {
        tracing::warn!("emergency stop");
        self.force_disable(now_s);
    }

    pub fn set_gains(&mut self, gains: ControllerGains) -> Result<()> {
        self.controller.set_gains(gains)
    }

    pub fn set_limits(&mut self, limits: ControllerLimits) -> Result<()> {
        self.controller.set_limits(limits)
    }

    pub fn set_feedforward(&mut self, ff: Feedforward) {
        self.controller.set_feedforward(ff);
    }

    pub fn set_filter_mode(&mut self, mode: FilterMode) {
        self.hall.set_filter_mode(mode);
    }

    pub fn configure_moving_average(&mut self, window: usize) {
        self.hall.configure_moving_average(window);
    }

    pub fn configure_low_pass(&mut self, tau_s: f64) -> Result<()> {
        self.hall.configure_low_pass(tau_s)
    }

    pub fn set_hall_offset(&mut self, v0_v: f64) {
        self.hall.set_offset(v0_v);
    }

    pub fn set_hall_sensitivity(&mut self, tesla_per_volt: f64) -> Result<()> {
        self.hall.set_sensitivity(tesla_per_volt)
    }

    pub fn set_prog_to_current(
        &mut self,
        prog_v0_v: f64,
        i0_a: f64,
        amps_per_volt: f64,
    ) -> Result<()> {
        self.supply.set_prog_to_current(prog_v0_v, i0_a, amps_per_volt)
    }

    pub fn set_current_to_field(&mut self, b0_t: f64, tesla_per_amp: f64) {
        self.supply.set_current_to_field(b0_t, tesla_per_amp);
    }

    pub fn open_session(&mut self, base: &std::path::Path, overwrite: bool) -> Result<()> {
        let meta = self.session_meta();
        self.logger.open_session(base, &meta, overwrite)?;
        self.log_suppressed = false;
        Ok(())
    }

    pub fn close_session(&mut self) {
        self.logger.close_session();
    }

    /// Metadata snapshot describing the calibrations and gains in effect.
    pub fn session_meta(&self) -> SessionMeta {
        let hall_cal = self.hall.calibration();
        let (prog, field) = self.supply.calibration();
        let (clamp_min_v, clamp_max_v) = self.supply.clamp_window();
        let gains = self.controller.gains();
        let limits = self.controller.limits();
        SessionMeta {
            hall: HallMeta {
                v0_v: hall_cal.offset_v,
                t_per_v: hall_cal.tesla_per_volt,
                filter: self.hall.filter_description(),
            },
            kepco: KepcoMeta {
                ao_channel: self.supply.ao_channel(),
                clamp_min_v,
                clamp_max_v,
                slew_vps: self.supply.slew_limit(),
            },
            calibration: CalibrationMeta {
                prog_v0_v: prog.prog_v0_v,
                i0_a: prog.i0_a,
                i_per_v: prog.amps_per_volt,
                b0_t: field.b0_t,
                t_per_a: field.tesla_per_amp,
            },
            controller: ControllerMeta {
                kp: gains.kp,
                ki: gains.ki,
                kd: gains.kd,
                ramp_tps: limits.ramp_t_per_s,
                deriv_tau_s: limits.deriv_tau_s,
                out_min_v: limits.out_min_v,
                out_max_v: limits.out_max_v,
            },
        }
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn controller(&self) -> &FieldController {
        &self.controller
    }

    pub fn supply(&self) -> &SupplyDriver {
        &self.supply
    }

    pub fn hall(&self) -> &HallConditioner {
        &self.hall
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.io
    }
}
