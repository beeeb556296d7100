//! Session files: `<base>.csv` telemetry rows plus `<base>.meta.txt`
//! describing the calibrations and gains the session ran with.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{FieldError, Result};
use crate::telemetry::Sample;
use crate::util::write_atomic;

const CSV_HEADER: [&str; 13] = [
    "t_utc_iso",
    "elapsed_s",
    "vhall_v",
    "bmeas_t",
    "bset_t",
    "vcmd_v",
    "err_t",
    "p_v",
    "i_v",
    "d_v",
    "enabled",
    "saturated",
    "fault",
];

/// Session metadata, one struct per meta-file section.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub hall: HallMeta,
    pub kepco: KepcoMeta,
    pub calibration: CalibrationMeta,
    pub controller: ControllerMeta,
}

#[derive(Debug, Clone)]
pub struct HallMeta {
    pub v0_v: f64,
    pub t_per_v: f64,
    pub filter: String,
}

#[derive(Debug, Clone)]
pub struct KepcoMeta {
    pub ao_channel: u32,
    pub clamp_min_v: f64,
    pub clamp_max_v: f64,
    pub slew_vps: f64,
}

#[derive(Debug, Clone)]
pub struct CalibrationMeta {
    pub prog_v0_v: f64,
    pub i0_a: f64,
    pub i_per_v: f64,
    pub b0_t: f64,
    pub t_per_a: f64,
}

#[derive(Debug, Clone)]
pub struct ControllerMeta {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub ramp_tps: f64,
    pub deriv_tau_s: f64,
    pub out_min_v: f64,
    pub out_max_v: f64,
}

/// Shortest round-trip float form; `Display` on f64 prints every needed
/// significant digit without trailing noise.
#[inline]
fn num(x: f64) -> String {
    format!("{x}")
}

#[inline]
fn flag(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn sibling_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{suffix}", base.display()))
}

/// Writes telemetry samples for one session.
///
/// `log_sample` before `open_session` (or after `close_session`) fails with
/// `FieldError::NotOpen`.
#[derive(Debug, Default)]
pub struct SessionLogger {
    writer: Option<csv::Writer<File>>,
    start_utc: Option<DateTime<Utc>>,
}

impl SessionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn start_utc(&self) -> Option<DateTime<Utc>> {
        self.start_utc
    }

    /// Create `<base>.csv` and `<base>.meta.txt`. Existing files are
    /// refused unless `overwrite` is set.
    pub fn open_session(&mut self, base: &Path, meta: &SessionMeta, overwrite: bool) -> Result<()> {
        let csv_path = sibling_with_suffix(base, ".csv");
        let meta_path = sibling_with_suffix(base, ".meta.txt");
        if !overwrite && (csv_path.exists() || meta_path.exists()) {
            return Err(eyre::Report::new(FieldError::Configuration(format!(
                "session files for {} already exist (pass overwrite to replace)",
                base.display()
            ))));
        }
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| eyre::Report::new(FieldError::Io(e.to_string())))?;
            }
        }

        let start_utc = Utc::now();
        write_atomic(&meta_path, render_meta(start_utc, meta).as_bytes())
            .map_err(|e| eyre::Report::new(FieldError::Io(e.to_string())))?;

        let file = File::create(&csv_path)
            .map_err(|e| eyre::Report::new(FieldError::Io(e.to_string())))?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(CSV_HEADER)
            .map_err(|e| eyre::Report::new(FieldError::Io(e.to_string())))?;
        writer
            .flush()
            .map_err(|e| eyre::Report::new(FieldError::Io(e.to_string())))?;

        self.writer = Some(writer);
        self.start_utc = Some(start_utc);
        tracing::info!(base = %base.display(), "session opened");
        Ok(())
    }

    /// Append one telemetry row.
    pub fn log_sample(&mut self, s: &Sample) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| eyre::Report::new(FieldError::NotOpen))?;
        writer
            .write_record([
                s.t_utc.to_rfc3339_opts(SecondsFormat::Millis, true),
                num(s.elapsed_s),
                num(s.v_hall),
                num(s.b_meas_t),
                num(s.b_set_t),
                num(s.v_cmd_v),
                num(s.err_t),
                num(s.p_v),
                num(s.i_v),
                num(s.d_v),
                flag(s.enabled).to_string(),
                flag(s.saturated).to_string(),
                flag(s.fault).to_string(),
            ])
            .map_err(|e| eyre::Report::new(FieldError::Io(e.to_string())))?;
        writer
            .flush()
            .map_err(|e| eyre::Report::new(FieldError::Io(e.to_string())))?;
        Ok(())
    }

    /// Flush and release the session files; further `log_sample` calls fail
    /// with NotOpen until the next `open_session`.
    pub fn close_session(&mut self) {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
            tracing::info!("session closed");
        }
        self.start_utc = None;
    }
}

fn render_meta(start_utc: DateTime<Utc>, m: &SessionMeta) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "StartUTC: {}\n",
        start_utc.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    out.push_str("[HallProbe]\n");
    out.push_str(&format!("V0_V: {}\n", num(m.hall.v0_v)));
    out.push_str(&format!("TperV: {}\n", num(m.hall.t_per_v)));
    out.push_str(&format!("Filter: {}\n", m.hall.filter));
    out.push_str("[Kepco]\n");
    out.push_str(&format!("AOChannel: {}\n", m.kepco.ao_channel));
    out.push_str(&format!("ClampMinV: {}\n", num(m.kepco.clamp_min_v)));
    out.push_str(&format!("ClampMaxV: {}\n", num(m.kepco.clamp_max_v)));
    out.push_str(&format!("SlewVps: {}\n", num(m.kepco.slew_vps)));
    out.push_str("[Calibration]\n");
    out.push_str(&format!("ProgV0_V: {}\n", num(m.calibration.prog_v0_v)));
    out.push_str(&format!("I0_A: {}\n", num(m.calibration.i0_a)));
    out.push_str(&format!("IperV: {}\n", num(m.calibration.i_per_v)));
    out.push_str(&format!("B0_T: {}\n", num(m.calibration.b0_t)));
    out.push_str(&format!("TperA: {}\n", num(m.calibration.t_per_a)));
    out.push_str("[Controller]\n");
    out.push_str(&format!("Kp: {}\n", num(m.controller.kp)));
    out.push_str(&format!("Ki: {}\n", num(m.controller.ki)));
    out.push_str(&format!("Kd: {}\n", num(m.controller.kd)));
    out.push_str(&format!("Ramp_Tps: {}\n", num(m.controller.ramp_tps)));
    out.push_str(&format!("DerivTau_s: {}\n", num(m.controller.deriv_tau_s)));
    out.push_str(&format!("OutMinV: {}\n", num(m.controller.out_min_v)));
    out.push_str(&format!("OutMaxV: {}\n", num(m.controller.out_max_v)));
    out
}
