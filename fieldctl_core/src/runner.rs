//! Paced session loop and the operator command channel.
//!
//! A session is a deadline-paced loop (nominal 20 Hz) around `Rig::tick`.
//! Operator commands arrive on a bounded channel and are drained before
//! each tick, so an E-stop lands before the next actuation. If a tick
//! overruns its deadline the missed periods are coalesced rather than
//! queued; the loop never tries to catch up with back-to-back ticks.

use std::time::Duration;

use crossbeam_channel as xch;
use fieldctl_traits::{AnalogIo, Clock, DigitalIo};

use crate::controller::{ControllerGains, ControllerLimits, Feedforward};
use crate::error::Result;
use crate::hall::FilterMode;
use crate::rig::Rig;
use crate::telemetry::Sample;
use crate::util::period_us;

/// Commands delivered onto the tick thread through a single-writer channel.
#[derive(Debug, Clone)]
pub enum OperatorCommand {
    SetTarget(f64),
    SetEnabled(bool),
    EStop,
    SetGains(ControllerGains),
    SetLimits(ControllerLimits),
    SetFeedforward(Feedforward),
    SetFilterMode(FilterMode),
    ConfigureMovingAverage(usize),
    ConfigureLowPass(f64),
    SetHallOffset(f64),
    SetHallSensitivity(f64),
    SetProgToCurrent {
        prog_v0_v: f64,
        i0_a: f64,
        amps_per_volt: f64,
    },
    SetCurrentToField {
        b0_t: f64,
        tesla_per_amp: f64,
    },
    OpenSession {
        base: std::path::PathBuf,
        overwrite: bool,
    },
    CloseSession,
    Stop,
}

/// Cloneable operator-side handle to the command channel.
#[derive(Debug, Clone)]
pub struct OperatorLink {
    tx: xch::Sender<OperatorCommand>,
}

impl OperatorLink {
    /// Bounded channel sized for burst operator input; the tick thread
    /// drains it every period.
    pub fn channel() -> (Self, xch::Receiver<OperatorCommand>) {
        let (tx, rx) = xch::bounded(64);
        (Self { tx }, rx)
    }

    /// Queue a command; returns false if the session has gone away.
    pub fn send(&self, cmd: OperatorCommand) -> bool {
        self.tx.send(cmd).is_ok()
    }

    pub fn estop(&self) -> bool {
        self.send(OperatorCommand::EStop)
    }
}

/// Tick pacing for one session.
#[derive(Debug, Clone, Copy)]
pub struct TickCfg {
    pub rate_hz: u32,
    /// Stop after this much monotonic session time; None runs until `Stop`.
    pub duration_s: Option<f64>,
}

impl Default for TickCfg {
    fn default() -> Self {
        Self {
            rate_hz: 20,
            duration_s: None,
        }
    }
}

/// What a finished session looked like.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub ticks: u64,
    pub faults: u64,
    /// Deadlines skipped because a tick overran its period.
    pub coalesced: u64,
    pub last_sample: Option<Sample>,
}

/// Drive the rig until `Stop`, E-stop-free duration expiry, or channel
/// disconnect. Returns per-session statistics.
pub fn run_session<P, C>(
    rig: &mut Rig<P>,
    clock: &C,
    cfg: TickCfg,
    commands: &xch::Receiver<OperatorCommand>,
) -> Result<SessionStats>
where
    P: AnalogIo + DigitalIo,
    C: Clock,
{
    let period = Duration::from_micros(period_us(cfg.rate_hz));
    let epoch = clock.now();
    let mut next_deadline = epoch + period;
    let mut stats = SessionStats::default();

    tracing::info!(rate_hz = cfg.rate_hz, "session loop started");
    loop {
        // Operator commands land before the tick body so an E-stop takes
        // effect ahead of the next actuation.
        let mut stop = false;
        loop {
            match commands.try_recv() {
                Ok(cmd) => {
                    let now_s = clock.secs_since(epoch);
                    apply_command(rig, now_s, cmd, &mut stop);
                }
                Err(xch::TryRecvError::Empty) => break,
                Err(xch::TryRecvError::Disconnected) => {
                    stop = true;
                    break;
                }
            }
        }
        if stop {
            break;
        }

        let now_s = clock.secs_since(epoch);
        if let Some(limit) = cfg.duration_s {
            if now_s >= limit {
                break;
            }
        }

        let sample = rig.tick(now_s);
        stats.ticks += 1;
        if sample.fault {
            stats.faults += 1;
        }
        stats.last_sample = Some(sample);

        // Pace to the next deadline; coalesce any we already blew past.
        let now = clock.now();
        if now < next_deadline {
            clock.sleep(next_deadline - now);
            next_deadline += period;
        } else {
            let mut skipped: u64 = 0;
            while next_deadline <= now {
                next_deadline += period;
                skipped += 1;
            }
            stats.coalesced += skipped.saturating_sub(1);
        }
    }

    tracing::info!(
        ticks = stats.ticks,
        faults = stats.faults,
        coalesced = stats.coalesced,
        "session loop finished"
    );
    Ok(stats)
}

fn apply_command<P: AnalogIo + DigitalIo>(
    rig: &mut Rig<P>,
    now_s: f64,
    cmd: OperatorCommand,
    stop: &mut bool,
) {
    match cmd {
        OperatorCommand::SetTarget(tesla) => rig.set_target(tesla),
        OperatorCommand::SetEnabled(enabled) => {
            if let Err(e) = rig.set_enabled(now_s, enabled) {
                tracing::warn!(error = %e, enabled, "enable change failed");
            }
        }
        OperatorCommand::EStop => rig.estop(now_s),
        OperatorCommand::SetGains(gains) => {
            if let Err(e) = rig.set_gains(gains) {
                tracing::warn!(error = %e, "gain update rejected");
            }
        }
        OperatorCommand::SetLimits(limits) => {
            if let Err(e) = rig.set_limits(limits) {
                tracing::warn!(error = %e, "limit update rejected");
            }
        }
        OperatorCommand::SetFeedforward(ff) => rig.set_feedforward(ff),
        OperatorCommand::SetFilterMode(mode) => rig.set_filter_mode(mode),
        OperatorCommand::ConfigureMovingAverage(window) => rig.configure_moving_average(window),
        OperatorCommand::ConfigureLowPass(tau_s) => {
            if let Err(e) = rig.configure_low_pass(tau_s) {
                tracing::warn!(error = %e, "low-pass update rejected");
            }
        }
        OperatorCommand::SetHallOffset(v0_v) => rig.set_hall_offset(v0_v),
        OperatorCommand::SetHallSensitivity(t_per_v) => {
            if let Err(e) = rig.set_hall_sensitivity(t_per_v) {
                tracing::warn!(error = %e, "hall sensitivity rejected");
            }
        }
        OperatorCommand::SetProgToCurrent {
            prog_v0_v,
            i0_a,
            amps_per_volt,
        } => {
            if let Err(e) = rig.set_prog_to_current(prog_v0_v, i0_a, amps_per_volt) {
                tracing::warn!(error = %e, "prog-to-current map rejected");
            }
        }
        OperatorCommand::SetCurrentToField { b0_t, tesla_per_amp } => {
            rig.set_current_to_field(b0_t, tesla_per_amp);
        }
        OperatorCommand::OpenSession { base, overwrite } => {
            if let Err(e) = rig.open_session(&base, overwrite) {
                tracing::warn!(error = %e, "session open failed");
            }
        }
        OperatorCommand::CloseSession => rig.close_session(),
        OperatorCommand::Stop => *stop = true,
    }
}
