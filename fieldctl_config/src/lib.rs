//! Typed configuration for the fieldctl stack.
//!
//! The TOML layout mirrors the hardware: `[aio]` wires channels, `[hall]`
//! and `[supply]` carry calibrations and safety windows, `[controller]` the
//! loop tuning, `[tick]` the loop rate and `[logging]` the tracing sink.
//! `Config::validate` rejects structurally bad values with typed errors
//! before anything touches hardware.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(&'static str),
    #[error("calibration csv: {0}")]
    Calibration(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AioCfg {
    pub hall_channel: u32,
    #[serde(default)]
    pub hall_range_index: u32,
    /// "ground" | "common" | "diff" | "other"
    #[serde(default = "default_aref")]
    pub hall_aref: String,
    pub ao_channel: u32,
    #[serde(default)]
    pub ao_range_index: u32,
}

fn default_aref() -> String {
    "diff".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HallCfg {
    pub v0_v: f64,
    pub tesla_per_volt: f64,
    /// "none" | "moving_average" | "low_pass"
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_ma_window")]
    pub ma_window: usize,
    #[serde(default)]
    pub lp_tau_s: f64,
}

fn default_filter() -> String {
    "none".to_string()
}

fn default_ma_window() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupplyCfg {
    pub clamp_min_v: f64,
    pub clamp_max_v: f64,
    #[serde(default)]
    pub slew_vps: f64,
    #[serde(default)]
    pub prog_v0_v: f64,
    #[serde(default)]
    pub i0_a: f64,
    pub amps_per_volt: f64,
    #[serde(default)]
    pub b0_t: f64,
    pub tesla_per_amp: f64,
    /// "none" | "digital"
    #[serde(default = "default_enable")]
    pub enable: String,
    #[serde(default)]
    pub enable_channel: u32,
}

fn default_enable() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedforwardCfg {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub v0_v: f64,
    #[serde(default)]
    pub volts_per_tesla: f64,
}

impl Default for FeedforwardCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            v0_v: 0.0,
            volts_per_tesla: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ControllerCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub integral_min_v: f64,
    pub integral_max_v: f64,
    pub out_min_v: f64,
    pub out_max_v: f64,
    #[serde(default)]
    pub slew_vps: f64,
    #[serde(default)]
    pub deriv_tau_s: f64,
    #[serde(default)]
    pub ramp_tps: f64,
    #[serde(default)]
    pub feedforward: FeedforwardCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TickCfg {
    pub rate_hz: u32,
}

impl Default for TickCfg {
    fn default() -> Self {
        Self { rate_hz: 20 }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub aio: AioCfg,
    pub hall: HallCfg,
    pub supply: SupplyCfg,
    pub controller: ControllerCfg,
    #[serde(default)]
    pub tick: TickCfg,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Structural validation; everything here would otherwise surface as a
    /// confusing runtime error deep inside the control loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.aio.hall_aref.as_str(), "ground" | "common" | "diff" | "other") {
            return Err(ConfigError::Invalid(
                "hall_aref must be one of ground/common/diff/other",
            ));
        }
        if self.hall.tesla_per_volt == 0.0 || !self.hall.tesla_per_volt.is_finite() {
            return Err(ConfigError::Invalid("hall tesla_per_volt must be nonzero"));
        }
        if !matches!(self.hall.filter.as_str(), "none" | "moving_average" | "low_pass") {
            return Err(ConfigError::Invalid(
                "hall filter must be none/moving_average/low_pass",
            ));
        }
        if self.hall.ma_window == 0 || self.hall.ma_window > 10_000 {
            return Err(ConfigError::Invalid("ma_window must be in 1..=10000"));
        }
        if self.hall.lp_tau_s < 0.0 {
            return Err(ConfigError::Invalid("lp_tau_s must be >= 0"));
        }
        if self.supply.clamp_max_v <= self.supply.clamp_min_v {
            return Err(ConfigError::Invalid("supply clamp_max_v must be > clamp_min_v"));
        }
        if self.supply.slew_vps < 0.0 {
            return Err(ConfigError::Invalid("supply slew_vps must be >= 0"));
        }
        if self.supply.amps_per_volt == 0.0 || !self.supply.amps_per_volt.is_finite() {
            return Err(ConfigError::Invalid("supply amps_per_volt must be nonzero"));
        }
        if self.supply.tesla_per_amp == 0.0 || !self.supply.tesla_per_amp.is_finite() {
            return Err(ConfigError::Invalid("supply tesla_per_amp must be nonzero"));
        }
        if !matches!(self.supply.enable.as_str(), "none" | "digital") {
            return Err(ConfigError::Invalid("supply enable must be none/digital"));
        }
        if self.controller.integral_max_v <= self.controller.integral_min_v {
            return Err(ConfigError::Invalid(
                "controller integral_max_v must be > integral_min_v",
            ));
        }
        if self.controller.out_max_v <= self.controller.out_min_v {
            return Err(ConfigError::Invalid("controller out_max_v must be > out_min_v"));
        }
        if self.controller.slew_vps < 0.0 {
            return Err(ConfigError::Invalid("controller slew_vps must be >= 0"));
        }
        if self.controller.deriv_tau_s < 0.0 {
            return Err(ConfigError::Invalid("controller deriv_tau_s must be >= 0"));
        }
        if self.controller.ramp_tps < 0.0 {
            return Err(ConfigError::Invalid("controller ramp_tps must be >= 0"));
        }
        if self.tick.rate_hz == 0 {
            return Err(ConfigError::Invalid("tick rate_hz must be > 0"));
        }
        Ok(())
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// One probe calibration measurement: field meter reading at a probe voltage.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationRow {
    pub volts: f64,
    pub tesla: f64,
}

/// Fitted Hall calibration: tesla = (volts - v0_v) * tesla_per_volt.
#[derive(Debug, Clone, Copy)]
pub struct HallFit {
    pub v0_v: f64,
    pub tesla_per_volt: f64,
}

impl HallFit {
    /// Fit the affine probe model from measurement rows.
    ///
    /// Two rows give the exact two-point solution; more rows use ordinary
    /// least squares. Rows must have strictly monotonic voltages so a bad
    /// export (shuffled or duplicated sweep points) is caught here.
    pub fn from_rows(rows: Vec<CalibrationRow>) -> Result<Self, ConfigError> {
        if rows.len() < 2 {
            return Err(ConfigError::Calibration(
                "need at least 2 calibration rows".into(),
            ));
        }
        let mut increasing = true;
        let mut decreasing = true;
        for pair in rows.windows(2) {
            if pair[1].volts == pair[0].volts {
                return Err(ConfigError::Calibration(format!(
                    "duplicate volts value {}",
                    pair[0].volts
                )));
            }
            if pair[1].volts < pair[0].volts {
                increasing = false;
            }
            if pair[1].volts > pair[0].volts {
                decreasing = false;
            }
        }
        if !increasing && !decreasing {
            return Err(ConfigError::Calibration(
                "volts must be monotonic (strictly increasing or strictly decreasing)".into(),
            ));
        }

        let n = rows.len() as f64;
        let mean_v = rows.iter().map(|r| r.volts).sum::<f64>() / n;
        let mean_b = rows.iter().map(|r| r.tesla).sum::<f64>() / n;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for r in &rows {
            let dv = r.volts - mean_v;
            sxx += dv * dv;
            sxy += dv * (r.tesla - mean_b);
        }
        let slope = sxy / sxx;
        if !slope.is_finite() || slope.abs() < 1e-15 {
            return Err(ConfigError::Calibration(
                "zero slope: field does not vary with probe voltage".into(),
            ));
        }
        // tesla = slope * (volts - v0)  =>  v0 where the fitted line crosses 0
        let v0_v = mean_v - mean_b / slope;
        Ok(Self {
            v0_v,
            tesla_per_volt: slope,
        })
    }
}

/// Load probe calibration rows from a strict `volts,tesla` CSV.
pub fn load_calibration_csv(path: &Path) -> Result<HallFit, ConfigError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| ConfigError::Calibration(e.to_string()))?;

    let headers = rdr
        .headers()
        .map_err(|e| ConfigError::Calibration(e.to_string()))?;
    if headers.len() != 2 || &headers[0] != "volts" || &headers[1] != "tesla" {
        return Err(ConfigError::Calibration(
            "calibration CSV must have headers 'volts,tesla'".into(),
        ));
    }

    let mut rows = Vec::new();
    for rec in rdr.deserialize::<(f64, f64)>() {
        let (volts, tesla) = rec.map_err(|e| ConfigError::Calibration(format!(
            "invalid CSV row: {e}"
        )))?;
        rows.push(CalibrationRow { volts, tesla });
    }
    HallFit::from_rows(rows)
}
