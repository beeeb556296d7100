use std::fs;

use chrono::Utc;
use fieldctl_core::error::FieldError;
use fieldctl_core::logger::{CalibrationMeta, ControllerMeta, HallMeta, KepcoMeta};
use fieldctl_core::{Sample, SessionLogger, SessionMeta};
use rstest::rstest;
use tempfile::tempdir;

fn meta() -> SessionMeta {
    SessionMeta {
        hall: HallMeta {
            v0_v: 0.012,
            t_per_v: 0.1,
            filter: "low_pass(0.05 s)".to_string(),
        },
        kepco: KepcoMeta {
            ao_channel: 2,
            clamp_min_v: -10.0,
            clamp_max_v: 10.0,
            slew_vps: 4.0,
        },
        calibration: CalibrationMeta {
            prog_v0_v: 0.0,
            i0_a: 0.0,
            i_per_v: 2.0,
            b0_t: 0.0,
            t_per_a: 0.05,
        },
        controller: ControllerMeta {
            kp: 5.0,
            ki: 1.0,
            kd: 0.0,
            ramp_tps: 0.1,
            deriv_tau_s: 0.02,
            out_min_v: -10.0,
            out_max_v: 10.0,
        },
    }
}

fn sample() -> Sample {
    Sample {
        t_utc: Utc::now(),
        elapsed_s: 0.05,
        v_hall: 0.1,
        b_meas_t: 0.01,
        b_set_t: 0.02,
        v_cmd_v: 0.5,
        err_t: 0.01,
        p_v: 0.05,
        i_v: 0.001,
        d_v: 0.0,
        enabled: true,
        saturated: false,
        fault: false,
    }
}

#[rstest]
fn log_before_open_fails_with_not_open() {
    let mut log = SessionLogger::new();
    let err = log.log_sample(&sample()).expect_err("not open");
    match err.downcast_ref::<FieldError>() {
        Some(FieldError::NotOpen) => {}
        other => panic!("expected NotOpen, got {other:?}"),
    }
}

#[rstest]
fn session_writes_csv_header_and_rows() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("run1");
    let mut log = SessionLogger::new();
    log.open_session(&base, &meta(), false).unwrap();
    log.log_sample(&sample()).unwrap();
    log.log_sample(&Sample {
        enabled: false,
        saturated: true,
        fault: true,
        ..sample()
    })
    .unwrap();
    log.close_session();

    let text = fs::read_to_string(dir.path().join("run1.csv")).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        "t_utc_iso,elapsed_s,vhall_v,bmeas_t,bset_t,vcmd_v,err_t,p_v,i_v,d_v,enabled,saturated,fault"
    );
    let row1 = lines.next().unwrap();
    assert!(row1.ends_with(",1,0,0"), "bools serialize as 0/1: {row1}");
    let row2 = lines.next().unwrap();
    assert!(row2.ends_with(",0,1,1"), "bools serialize as 0/1: {row2}");
    assert!(lines.next().is_none());
}

#[rstest]
fn meta_file_carries_sections_and_start_utc() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("run2");
    let mut log = SessionLogger::new();
    log.open_session(&base, &meta(), false).unwrap();
    log.close_session();

    let text = fs::read_to_string(dir.path().join("run2.meta.txt")).unwrap();
    for needle in [
        "[HallProbe]",
        "[Kepco]",
        "[Calibration]",
        "[Controller]",
        "V0_V: 0.012",
        "TperV: 0.1",
        "Filter: low_pass(0.05 s)",
        "AOChannel: 2",
        "ClampMinV: -10",
        "ClampMaxV: 10",
        "SlewVps: 4",
        "ProgV0_V: 0",
        "I0_A: 0",
        "IperV: 2",
        "B0_T: 0",
        "TperA: 0.05",
        "Kp: 5",
        "Ki: 1",
        "Kd: 0",
        "Ramp_Tps: 0.1",
        "DerivTau_s: 0.02",
        "OutMinV: -10",
        "OutMaxV: 10",
    ] {
        assert!(text.contains(needle), "missing {needle:?} in:\n{text}");
    }

    // StartUTC: ISO-8601, millisecond precision, trailing Z
    let start = text
        .lines()
        .find(|l| l.starts_with("StartUTC: "))
        .expect("StartUTC line");
    let stamp = start.trim_start_matches("StartUTC: ");
    assert!(stamp.ends_with('Z'), "stamp {stamp}");
    let dot = stamp.find('.').expect("fractional seconds");
    assert_eq!(stamp.len() - dot, 5, "exactly three fractional digits: {stamp}");
}

#[rstest]
fn existing_session_files_require_overwrite() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("run3");
    let mut log = SessionLogger::new();
    log.open_session(&base, &meta(), false).unwrap();
    log.close_session();

    let mut second = SessionLogger::new();
    let err = second
        .open_session(&base, &meta(), false)
        .expect_err("must refuse to clobber");
    match err.downcast_ref::<FieldError>() {
        Some(FieldError::Configuration(_)) => {}
        other => panic!("expected Configuration, got {other:?}"),
    }

    second.open_session(&base, &meta(), true).unwrap();
    assert!(second.is_open());
}

#[rstest]
fn close_makes_logger_not_open_again() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("run4");
    let mut log = SessionLogger::new();
    log.open_session(&base, &meta(), false).unwrap();
    log.log_sample(&sample()).unwrap();
    log.close_session();
    assert!(!log.is_open());
    assert!(log.log_sample(&sample()).is_err());
}
