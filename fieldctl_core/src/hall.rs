//! Hall-probe signal conditioning: affine volts→Tesla calibration with
//! optional moving-average or first-order low-pass filtering.

use fieldctl_traits::{AnalogIo, AnalogReference};

use crate::error::{map_io_error, FieldError, Result};

/// Sensitivities below this are treated as degenerate (division guard).
const MIN_SENSITIVITY_T_PER_V: f64 = 1e-15;

/// Hard cap on the moving-average window.
const MA_WINDOW_MAX: usize = 10_000;

/// Affine probe calibration: B = (V - V0) * S.
#[derive(Debug, Clone)]
pub struct HallCalibration {
    pub offset_v: f64,
    pub tesla_per_volt: f64,
}

impl Default for HallCalibration {
    fn default() -> Self {
        Self {
            offset_v: 0.0,
            // 10 V/T probe front-end, matches the simulated bench
            tesla_per_volt: 0.1,
        }
    }
}

/// Which filter runs after calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    None,
    MovingAverage,
    LowPass,
}

/// Wiring of the Hall analog input on the acquisition device.
#[derive(Debug, Clone, Copy)]
pub struct AnalogInputCfg {
    pub channel: u32,
    pub range_index: u32,
    pub aref: AnalogReference,
}

impl Default for AnalogInputCfg {
    fn default() -> Self {
        Self {
            channel: 0,
            range_index: 0,
            aref: AnalogReference::Differential,
        }
    }
}

/// Ring buffer with an incrementally maintained sum.
///
/// The running sum is updated by subtracting the overwritten slot and adding
/// the new sample, so each step is O(1) and the buffer contents always
/// reconstruct the sum exactly.
#[derive(Debug, Clone)]
struct MovingAverage {
    buf: Vec<f64>,
    idx: usize,
    fill: usize,
    sum: f64,
}

impl MovingAverage {
    fn with_window(n: usize) -> Self {
        Self {
            buf: vec![0.0; n],
            idx: 0,
            fill: 0,
            sum: 0.0,
        }
    }

    fn reset(&mut self) {
        self.buf.fill(0.0);
        self.idx = 0;
        self.fill = 0;
        self.sum = 0.0;
    }

    fn apply(&mut self, x: f64) -> f64 {
        let n = self.buf.len();
        if self.fill < n {
            self.fill += 1;
        } else {
            self.sum -= self.buf[self.idx];
        }
        self.sum += x;
        self.buf[self.idx] = x;
        self.idx = (self.idx + 1) % n;
        self.sum / self.fill as f64
    }
}

/// Discrete first-order low-pass; primed by the first sample after reset.
#[derive(Debug, Clone, Default)]
struct LowPass {
    tau_s: f64,
    state: f64,
    primed: bool,
}

impl LowPass {
    fn reset(&mut self) {
        self.state = 0.0;
        self.primed = false;
    }

    fn apply(&mut self, x: f64, dt_s: f64) -> f64 {
        if !self.primed {
            self.primed = true;
            self.state = x;
            return x;
        }
        let alpha = if self.tau_s > 0.0 && dt_s > 0.0 {
            dt_s / (self.tau_s + dt_s)
        } else {
            1.0
        };
        self.state += alpha * (x - self.state);
        self.state
    }
}

/// Converts raw probe voltage into calibrated, optionally filtered field.
#[derive(Debug, Clone)]
pub struct HallConditioner {
    cal: HallCalibration,
    mode: FilterMode,
    ma: MovingAverage,
    lp: LowPass,
}

impl Default for HallConditioner {
    fn default() -> Self {
        Self::new(HallCalibration::default())
    }
}

impl HallConditioner {
    pub fn new(cal: HallCalibration) -> Self {
        Self {
            cal,
            mode: FilterMode::None,
            ma: MovingAverage::with_window(1),
            lp: LowPass::default(),
        }
    }

    pub fn calibration(&self) -> &HallCalibration {
        &self.cal
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.mode
    }

    /// Human-readable filter description for session metadata.
    pub fn filter_description(&self) -> String {
        match self.mode {
            FilterMode::None => "none".to_string(),
            FilterMode::MovingAverage => format!("moving_average({})", self.ma.buf.len()),
            FilterMode::LowPass => format!("low_pass({} s)", self.lp.tau_s),
        }
    }

    pub fn set_offset(&mut self, v0_v: f64) {
        self.cal.offset_v = v0_v;
    }

    /// Set probe sensitivity in T/V. Degenerate values are rejected and
    /// leave the calibration untouched.
    pub fn set_sensitivity(&mut self, tesla_per_volt: f64) -> Result<()> {
        if !tesla_per_volt.is_finite() || tesla_per_volt.abs() < MIN_SENSITIVITY_T_PER_V {
            return Err(eyre::Report::new(FieldError::Calibration(format!(
                "hall sensitivity {tesla_per_volt} T/V below {MIN_SENSITIVITY_T_PER_V}"
            ))));
        }
        self.cal.tesla_per_volt = tesla_per_volt;
        Ok(())
    }

    /// Select the filter; any mode change resets filter state.
    pub fn set_filter_mode(&mut self, mode: FilterMode) {
        self.mode = mode;
        self.reset_filter();
    }

    /// Configure the moving-average window. The window is clamped to
    /// [1, 10000]; state is reset.
    pub fn configure_moving_average(&mut self, window: usize) {
        let n = window.clamp(1, MA_WINDOW_MAX);
        self.ma = MovingAverage::with_window(n);
    }

    /// Configure the low-pass time constant in seconds; state is reset.
    pub fn configure_low_pass(&mut self, tau_s: f64) -> Result<()> {
        if !tau_s.is_finite() || tau_s < 0.0 {
            return Err(eyre::Report::new(FieldError::Calibration(format!(
                "low-pass time constant {tau_s} s must be >= 0"
            ))));
        }
        self.lp.tau_s = tau_s;
        self.lp.reset();
        Ok(())
    }

    /// Clear filter state without changing mode or parameters.
    pub fn reset_filter(&mut self) {
        self.ma.reset();
        self.lp.reset();
    }

    /// Pure affine conversion, no filtering.
    #[inline]
    pub fn voltage_to_field(&self, volts: f64) -> f64 {
        (volts - self.cal.offset_v) * self.cal.tesla_per_volt
    }

    /// Convert and run the selected filter. `dt_s` is the tick interval and
    /// only matters to the low-pass.
    pub fn voltage_to_field_filtered(&mut self, volts: f64, dt_s: f64) -> f64 {
        let b = self.voltage_to_field(volts);
        match self.mode {
            FilterMode::None => b,
            FilterMode::MovingAverage => self.ma.apply(b),
            FilterMode::LowPass => self.lp.apply(b, dt_s),
        }
    }

    /// Read the probe through the port and return (raw volts, filtered field).
    pub fn read_field<P: AnalogIo>(
        &mut self,
        io: &mut P,
        ai: &AnalogInputCfg,
        dt_s: f64,
    ) -> Result<(f64, f64)> {
        let volts = io
            .read_input_volts(ai.channel, ai.range_index, ai.aref)
            .map_err(|e| eyre::Report::new(map_io_error(&*e)))?;
        let field = self.voltage_to_field_filtered(volts, dt_s);
        Ok((volts, field))
    }
}

#[cfg(test)]
mod filter_tests {
    use super::*;

    #[test]
    fn moving_average_partial_fill_divides_by_count() {
        let mut ma = MovingAverage::with_window(4);
        assert_eq!(ma.apply(2.0), 2.0);
        assert_eq!(ma.apply(4.0), 3.0);
        assert_eq!(ma.apply(6.0), 4.0);
    }

    #[test]
    fn moving_average_overwrites_oldest() {
        let mut ma = MovingAverage::with_window(2);
        ma.apply(1.0);
        ma.apply(3.0);
        // window now [1, 3]; pushing 5 evicts 1
        assert_eq!(ma.apply(5.0), 4.0);
    }

    #[test]
    fn low_pass_first_sample_passes_through() {
        let mut lp = LowPass {
            tau_s: 1.0,
            ..LowPass::default()
        };
        assert_eq!(lp.apply(7.5, 0.1), 7.5);
        let y = lp.apply(0.0, 0.1);
        assert!(y > 0.0 && y < 7.5);
    }

    #[test]
    fn low_pass_zero_tau_is_identity() {
        let mut lp = LowPass::default();
        lp.apply(1.0, 0.1);
        assert_eq!(lp.apply(-3.25, 0.1), -3.25);
    }
}
