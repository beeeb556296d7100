//! Bipolar power-supply driver: calibrated affine chain from field/current
//! down to the analog programming voltage, with output clamp, slew limit and
//! an optional digital enable interlock.

use fieldctl_traits::{AnalogIo, DigitalIo};

use crate::error::{map_io_error, FieldError, Result};

/// Affine slopes below this magnitude cannot be inverted safely.
const MIN_SLOPE: f64 = 1e-12;

/// Program-voltage to output-current map: I = I0 + (V - V0) * (A/V).
#[derive(Debug, Clone)]
pub struct ProgCurrentMap {
    pub prog_v0_v: f64,
    pub i0_a: f64,
    pub amps_per_volt: f64,
}

impl Default for ProgCurrentMap {
    fn default() -> Self {
        // ±10 V programming input spanning ±20 A
        Self {
            prog_v0_v: 0.0,
            i0_a: 0.0,
            amps_per_volt: 2.0,
        }
    }
}

/// Coil current to field map: B = B0 + I * (T/A).
#[derive(Debug, Clone)]
pub struct CurrentFieldMap {
    pub b0_t: f64,
    pub tesla_per_amp: f64,
}

impl Default for CurrentFieldMap {
    fn default() -> Self {
        Self {
            b0_t: 0.0,
            tesla_per_amp: 0.05,
        }
    }
}

/// How the supply output stage is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableMode {
    /// Software-only gating; no interlock line is driven.
    None,
    /// A digital output line gates the supply (high = enabled).
    DigitalLine,
}

/// Drives the supply's analog programming input through the I/O port.
///
/// The driver never owns the port: every I/O-touching operation borrows it
/// for the duration of the call, so the Hall read path can share the same
/// device from the tick thread.
#[derive(Debug, Clone)]
pub struct SupplyDriver {
    ao_channel: u32,
    range_index: u32,
    clamp_min_v: f64,
    clamp_max_v: f64,
    slew_v_per_s: f64,
    prog: ProgCurrentMap,
    field: CurrentFieldMap,
    enable_mode: EnableMode,
    enable_channel: u32,
    enabled: bool,
    last_cmd_v: f64,
    // None until the first command after enable, making that command's dt 0
    last_update_s: Option<f64>,
}

impl Default for SupplyDriver {
    fn default() -> Self {
        Self {
            ao_channel: 0,
            range_index: 0,
            clamp_min_v: -10.0,
            clamp_max_v: 10.0,
            slew_v_per_s: 0.0,
            prog: ProgCurrentMap::default(),
            field: CurrentFieldMap::default(),
            enable_mode: EnableMode::None,
            enable_channel: 0,
            enabled: false,
            last_cmd_v: 0.0,
            last_update_s: None,
        }
    }
}

impl SupplyDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the AO channel, range and hardware clamp window.
    pub fn configure_analog_output(
        &mut self,
        channel: u32,
        range_index: u32,
        clamp_min_v: f64,
        clamp_max_v: f64,
    ) -> Result<()> {
        if !(clamp_max_v > clamp_min_v) {
            return Err(eyre::Report::new(FieldError::Configuration(format!(
                "output clamp [{clamp_min_v}, {clamp_max_v}] V must satisfy max > min"
            ))));
        }
        self.ao_channel = channel;
        self.range_index = range_index;
        self.clamp_min_v = clamp_min_v;
        self.clamp_max_v = clamp_max_v;
        Ok(())
    }

    /// Slew limit in V/s; 0 disables slew limiting.
    pub fn set_slew_limit(&mut self, volts_per_s: f64) -> Result<()> {
        if !volts_per_s.is_finite() || volts_per_s < 0.0 {
            return Err(eyre::Report::new(FieldError::Configuration(format!(
                "slew limit {volts_per_s} V/s must be >= 0"
            ))));
        }
        self.slew_v_per_s = volts_per_s;
        Ok(())
    }

    /// Program-voltage↔current calibration; the slope must be invertible.
    pub fn set_prog_to_current(
        &mut self,
        prog_v0_v: f64,
        i0_a: f64,
        amps_per_volt: f64,
    ) -> Result<()> {
        if !amps_per_volt.is_finite() || amps_per_volt.abs() < MIN_SLOPE {
            return Err(eyre::Report::new(FieldError::Calibration(format!(
                "amps-per-volt {amps_per_volt} below {MIN_SLOPE}"
            ))));
        }
        self.prog = ProgCurrentMap {
            prog_v0_v,
            i0_a,
            amps_per_volt,
        };
        Ok(())
    }

    pub fn set_current_to_field(&mut self, b0_t: f64, tesla_per_amp: f64) {
        self.field = CurrentFieldMap { b0_t, tesla_per_amp };
    }

    pub fn configure_digital_enable(&mut self, mode: EnableMode, channel: u32) {
        self.enable_mode = mode;
        self.enable_channel = channel;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn last_program_voltage(&self) -> f64 {
        self.last_cmd_v
    }

    #[inline]
    pub fn clamp_window(&self) -> (f64, f64) {
        (self.clamp_min_v, self.clamp_max_v)
    }

    #[inline]
    pub fn slew_limit(&self) -> f64 {
        self.slew_v_per_s
    }

    #[inline]
    pub fn ao_channel(&self) -> u32 {
        self.ao_channel
    }

    /// Enable or disable the output stage.
    ///
    /// Disabling zeroes the programming output within this call and resets
    /// the slew history so a later re-enable starts from 0 V with dt = 0.
    pub fn set_enabled<P: AnalogIo + DigitalIo>(
        &mut self,
        io: &mut P,
        now_s: f64,
        enabled: bool,
    ) -> Result<()> {
        if enabled {
            self.enabled = true;
            self.last_update_s = None;
            if self.enable_mode == EnableMode::DigitalLine {
                io.write_digital(self.enable_channel, true)
                    .map_err(|e| eyre::Report::new(map_io_error(&*e)))?;
            }
            tracing::info!(ao_channel = self.ao_channel, "supply enabled");
            return Ok(());
        }

        // Zero the analog program first, then drop the interlock line.
        self.enabled = false;
        io.write_output_volts(
            self.ao_channel,
            0.0,
            self.range_index,
            self.clamp_min_v,
            self.clamp_max_v,
        )
        .map_err(|e| eyre::Report::new(map_io_error(&*e)))?;
        self.last_cmd_v = 0.0;
        self.last_update_s = Some(now_s);
        if self.enable_mode == EnableMode::DigitalLine {
            io.write_digital(self.enable_channel, false)
                .map_err(|e| eyre::Report::new(map_io_error(&*e)))?;
        }
        tracing::info!(ao_channel = self.ao_channel, "supply disabled, output zeroed");
        Ok(())
    }

    /// Command a programming voltage. Pipeline: clamp to the hardware
    /// window, then limit the excursion by slew * dt, then write. The clamp
    /// runs first so the safety window always holds; slew only shapes the
    /// path toward the clamped target.
    pub fn command_program_voltage<P: AnalogIo>(
        &mut self,
        io: &mut P,
        now_s: f64,
        v_prog: f64,
    ) -> Result<f64> {
        if !self.enabled {
            return Err(eyre::Report::new(FieldError::NotEnabled));
        }
        let target = v_prog.clamp(self.clamp_min_v, self.clamp_max_v);
        let dt = match self.last_update_s {
            Some(t) => (now_s - t).max(0.0),
            None => 0.0,
        };
        let out = if self.slew_v_per_s > 0.0 {
            let step_max = self.slew_v_per_s * dt;
            self.last_cmd_v + (target - self.last_cmd_v).clamp(-step_max, step_max)
        } else {
            target
        };
        io.write_output_volts(
            self.ao_channel,
            out,
            self.range_index,
            self.clamp_min_v,
            self.clamp_max_v,
        )
        .map_err(|e| eyre::Report::new(map_io_error(&*e)))?;
        self.last_cmd_v = out;
        self.last_update_s = Some(now_s);
        Ok(out)
    }

    /// Command a supply output current in amps.
    pub fn command_current<P: AnalogIo>(
        &mut self,
        io: &mut P,
        now_s: f64,
        amps: f64,
    ) -> Result<f64> {
        let v = self.current_to_program_voltage(amps);
        self.command_program_voltage(io, now_s, v)
    }

    /// Command a field in Tesla.
    pub fn command_field<P: AnalogIo>(
        &mut self,
        io: &mut P,
        now_s: f64,
        tesla: f64,
    ) -> Result<f64> {
        let amps = self.field_to_current(tesla)?;
        self.command_current(io, now_s, amps)
    }

    #[inline]
    pub fn prog_voltage_to_current(&self, volts: f64) -> f64 {
        self.prog.i0_a + (volts - self.prog.prog_v0_v) * self.prog.amps_per_volt
    }

    #[inline]
    pub fn current_to_program_voltage(&self, amps: f64) -> f64 {
        // amps_per_volt is validated >= MIN_SLOPE at the setter
        self.prog.prog_v0_v + (amps - self.prog.i0_a) / self.prog.amps_per_volt
    }

    #[inline]
    pub fn current_to_field(&self, amps: f64) -> f64 {
        self.field.b0_t + amps * self.field.tesla_per_amp
    }

    /// Invert the current→field map; fails on a degenerate slope.
    pub fn field_to_current(&self, tesla: f64) -> Result<f64> {
        let tpa = self.field.tesla_per_amp;
        if !tpa.is_finite() || tpa.abs() < MIN_SLOPE {
            return Err(eyre::Report::new(FieldError::Calibration(format!(
                "tesla-per-amp {tpa} below {MIN_SLOPE}, field map not invertible"
            ))));
        }
        Ok((tesla - self.field.b0_t) / tpa)
    }

    /// Snapshot of the calibration maps, used by the session metadata.
    pub fn calibration(&self) -> (&ProgCurrentMap, &CurrentFieldMap) {
        (&self.prog, &self.field)
    }
}
