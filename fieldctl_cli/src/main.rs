use std::{fs, path::PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use eyre::WrapErr;
use fieldctl_config::{load_calibration_csv, Config, HallFit};
use fieldctl_core::error::Result as CoreResult;

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod rt;

static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn humanize(err: &eyre::Report) -> String {
    use fieldctl_config::ConfigError;
    use fieldctl_core::FieldError;

    if let Some(fe) = err.downcast_ref::<FieldError>() {
        return match fe {
            FieldError::Calibration(msg) => format!(
                "What happened: A calibration parameter was rejected ({msg}).\nLikely causes: Degenerate slope or negative time constant in the config or calibration CSV.\nHow to fix: Check [hall]/[supply] values; slopes must be nonzero and time constants >= 0."
            ),
            FieldError::Configuration(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Flipped clamp window, negative slew/ramp, or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See README for a sample."
            ),
            FieldError::NotEnabled => {
                "What happened: An output was commanded while the supply is disabled.\nLikely causes: E-stop tripped, a fault force-disabled the supply, or enable was never sent.\nHow to fix: Clear the fault condition and re-enable before commanding output.".to_string()
            }
            FieldError::Io(msg) => format!(
                "What happened: A hardware call through the I/O port failed ({msg}).\nLikely causes: Device unplugged, wrong channel numbers, or insufficient permissions on the device node.\nHow to fix: Check the [aio] channel mapping and device permissions, then rerun."
            ),
            FieldError::NotOpen => {
                "What happened: Telemetry was logged without an open session.\nLikely causes: open_session failed earlier or the session was already closed.\nHow to fix: Start a new session (pass --session) and retry.".to_string()
            }
        };
    }

    if let Some(ce) = err.downcast_ref::<ConfigError>() {
        return format!(
            "What happened: Configuration rejected ({ce}).\nLikely causes: Missing or out-of-range values in the TOML, or a malformed calibration CSV.\nHow to fix: Edit the file and rerun; `volts,tesla` is the required calibration header."
        );
    }

    // Calibration CSV header special-case for bare-string errors
    let msg = err.to_string();
    if msg.to_ascii_lowercase().contains("volts,tesla") {
        return "Invalid headers in calibration CSV. Expected 'volts,tesla'.".to_string();
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Build a file sink writer with optional rotation, storing the non-blocking guard in OnceLock.
fn file_layer(
    file: Option<&str>,
    rotation: Option<&str>,
) -> Option<tracing_appender::non_blocking::NonBlocking> {
    let path = file?;
    let p = std::path::Path::new(path);
    if let Some(parent) = p.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let file_appender = match rotation.unwrap_or("never").to_ascii_lowercase().as_str() {
        "daily" => tracing_appender::rolling::daily(".", path),
        "hourly" => tracing_appender::rolling::hourly(".", path),
        _ => tracing_appender::rolling::never(".", path),
    };
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(guard);
    Some(nb_writer)
}

/// Initialize tracing once for the whole app.
fn init_tracing(json: bool, level: &str, file: Option<&str>, rotation: Option<&str>) {
    // Prefer RUST_LOG if set; otherwise use CLI level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let console = fmt::layer().json().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    } else {
        let console = fmt::layer().pretty().with_target(false);
        if let Some(nb_writer) = file_layer(file, rotation) {
            let file_l = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(nb_writer);
            registry.with(console).with(file_l).init();
        } else {
            registry.with(console).init();
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "fieldctl", version, about = "Electromagnet field controller CLI")]
struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/fieldctl.toml")]
    config: PathBuf,

    /// Optional Hall calibration CSV (strict 'volts,tesla' header)
    #[arg(long, value_name = "FILE")]
    calibration: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Log level: trace,debug,info,warn,error
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a closed-loop session toward a target field in Tesla
    Run {
        #[arg(long)]
        tesla: f64,
        /// Session length in seconds
        #[arg(long, value_name = "S", default_value_t = 5.0)]
        duration_s: f64,
        /// Base path for session files (<base>.csv, <base>.meta.txt)
        #[arg(long, value_name = "BASE")]
        session: Option<PathBuf>,
        /// Replace existing session files
        #[arg(long, action = ArgAction::SetTrue)]
        overwrite: bool,
        /// Enable real-time mode (SCHED_FIFO, mlockall; Linux only)
        #[arg(long, action = ArgAction::SetTrue)]
        rt: bool,
    },
    /// Quick health check (simulated bench reachable, loop closes)
    SelfCheck,
}

fn main() -> eyre::Result<()> {
    if let Err(e) = real_main() {
        eprintln!("{}", humanize(&e));
        std::process::exit(2);
    }
    Ok(())
}

fn real_main() -> eyre::Result<()> {
    let cli = Cli::parse();

    // 1) Load typed config from TOML
    let cfg_text = fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {:?}", cli.config))?;
    let cfg: Config =
        toml::from_str(&cfg_text).wrap_err_with(|| format!("parse config {:?}", cli.config))?;

    cfg.validate().wrap_err("invalid configuration")?;

    init_tracing(
        cli.json,
        &cli.log_level,
        cfg.logging.file.as_deref(),
        cfg.logging.rotation.as_deref(),
    );

    // 2) Load calibration if provided
    let calib: Option<HallFit> = match &cli.calibration {
        Some(p) => {
            let fit = load_calibration_csv(p)
                .map_err(|e| eyre::eyre!("parse calibration {:?}: {}", p, e))?;
            tracing::info!(v0_v = fit.v0_v, t_per_v = fit.tesla_per_volt, "calibration loaded");
            Some(fit)
        }
        None => None,
    };

    match cli.cmd {
        Commands::SelfCheck => self_check(&cfg, calib.as_ref()),
        Commands::Run {
            tesla,
            duration_s,
            session,
            overwrite,
            rt,
        } => {
            rt::setup_rt_once(rt);
            run_loop(&cfg, calib.as_ref(), tesla, duration_s, session.as_deref(), overwrite)
        }
    }
}

fn aref_from_str(s: &str) -> fieldctl_traits::AnalogReference {
    use fieldctl_traits::AnalogReference as A;
    match s {
        "ground" => A::Ground,
        "common" => A::Common,
        "other" => A::Other,
        _ => A::Differential,
    }
}

/// Wire config + optional calibration override into a rig over the
/// simulated bench.
fn build_rig(
    cfg: &Config,
    calib: Option<&HallFit>,
) -> CoreResult<fieldctl_core::Rig<fieldctl_hardware::SimulatedBench>> {
    use fieldctl_core::{
        AnalogInputCfg, ControllerGains, ControllerLimits, Feedforward, FieldController,
        FilterMode, HallCalibration, HallConditioner, Rig, SupplyDriver,
    };

    let v0_v = calib.map_or(cfg.hall.v0_v, |c| c.v0_v);
    let tesla_per_volt = calib.map_or(cfg.hall.tesla_per_volt, |c| c.tesla_per_volt);

    let mut hall = HallConditioner::new(HallCalibration {
        offset_v: v0_v,
        ..HallCalibration::default()
    });
    // sensitivity goes through the setter so degenerate slopes are rejected
    hall.set_sensitivity(tesla_per_volt)?;
    match cfg.hall.filter.as_str() {
        "moving_average" => {
            hall.configure_moving_average(cfg.hall.ma_window);
            hall.set_filter_mode(FilterMode::MovingAverage);
        }
        "low_pass" => {
            hall.configure_low_pass(cfg.hall.lp_tau_s)?;
            hall.set_filter_mode(FilterMode::LowPass);
        }
        _ => hall.set_filter_mode(FilterMode::None),
    }

    let mut supply = SupplyDriver::new();
    supply.configure_analog_output(
        cfg.aio.ao_channel,
        cfg.aio.ao_range_index,
        cfg.supply.clamp_min_v,
        cfg.supply.clamp_max_v,
    )?;
    supply.set_slew_limit(cfg.supply.slew_vps)?;
    supply.set_prog_to_current(cfg.supply.prog_v0_v, cfg.supply.i0_a, cfg.supply.amps_per_volt)?;
    supply.set_current_to_field(cfg.supply.b0_t, cfg.supply.tesla_per_amp);
    if cfg.supply.enable == "digital" {
        supply.configure_digital_enable(
            fieldctl_core::EnableMode::DigitalLine,
            cfg.supply.enable_channel,
        );
    }

    let gains = ControllerGains {
        kp: cfg.controller.kp,
        ki: cfg.controller.ki,
        kd: cfg.controller.kd,
    };
    let limits = ControllerLimits {
        integral_min_v: cfg.controller.integral_min_v,
        integral_max_v: cfg.controller.integral_max_v,
        out_min_v: cfg.controller.out_min_v,
        out_max_v: cfg.controller.out_max_v,
        slew_v_per_s: cfg.controller.slew_vps,
        deriv_tau_s: cfg.controller.deriv_tau_s,
        ramp_t_per_s: cfg.controller.ramp_tps,
    };
    let mut controller = FieldController::new(gains, limits)?;
    controller.set_feedforward(Feedforward {
        enabled: cfg.controller.feedforward.enabled,
        v0_v: cfg.controller.feedforward.v0_v,
        volts_per_tesla: cfg.controller.feedforward.volts_per_tesla,
    });

    let bench = fieldctl_hardware::SimulatedBench::new(fieldctl_hardware::BenchCfg {
        hall_channel: cfg.aio.hall_channel,
        ao_channel: cfg.aio.ao_channel,
        enable_channel: cfg.supply.enable_channel,
        amps_per_volt: cfg.supply.amps_per_volt,
        tesla_per_amp: cfg.supply.tesla_per_amp,
        hall_offset_v: v0_v,
        hall_volts_per_tesla: 1.0 / tesla_per_volt,
        coil_tau_s: 0.05,
    });

    let ai = AnalogInputCfg {
        channel: cfg.aio.hall_channel,
        range_index: cfg.aio.hall_range_index,
        aref: aref_from_str(&cfg.aio.hall_aref),
    };

    Ok(Rig::new(bench, ai, hall, controller, supply))
}

fn self_check(cfg: &Config, calib: Option<&HallFit>) -> eyre::Result<()> {
    tracing::info!("self-check starting");
    let mut rig = build_rig(cfg, calib)?;

    // Probe the Hall input and exercise an enable/zero/disable cycle.
    let sample = rig.tick(0.0);
    if sample.fault {
        return Err(eyre::eyre!("hall read failed during self-check"));
    }
    rig.set_enabled(0.0, true).wrap_err("supply enable failed")?;
    rig.set_enabled(0.0, false).wrap_err("supply disable failed")?;

    tracing::info!("self-check ok");
    println!("OK");
    Ok(())
}

fn run_loop(
    cfg: &Config,
    calib: Option<&HallFit>,
    tesla: f64,
    duration_s: f64,
    session: Option<&std::path::Path>,
    overwrite: bool,
) -> eyre::Result<()> {
    use fieldctl_core::{run_session, OperatorLink, TickCfg};
    use fieldctl_traits::MonotonicClock;

    let mut rig = build_rig(cfg, calib)?;

    if let Some(base) = session {
        rig.open_session(base, overwrite)?;
    }
    rig.set_enabled(0.0, true)?;
    rig.set_target(tesla);

    // Keep the link alive for the whole run; dropping it stops the loop.
    let (link, rx) = OperatorLink::channel();
    tracing::info!(tesla, duration_s, "run start");
    let stats = run_session(
        &mut rig,
        &MonotonicClock::new(),
        TickCfg {
            rate_hz: cfg.tick.rate_hz,
            duration_s: Some(duration_s),
        },
        &rx,
    )?;
    drop(link);

    rig.set_enabled(duration_s, false)?;
    rig.close_session();

    let final_b = stats.last_sample.map_or(0.0, |s| s.b_meas_t);
    tracing::info!(
        ticks = stats.ticks,
        faults = stats.faults,
        coalesced = stats.coalesced,
        final_b,
        "run complete"
    );
    println!("final field: {final_b:.6} T");
    if stats.faults > 0 {
        eprintln!("warning: {} faulted tick(s); see log", stats.faults);
    }
    Ok(())
}
