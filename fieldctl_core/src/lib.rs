#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core field-control logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent closed-loop engine for an
//! electromagnet driven by a bipolar power supply. All hardware interactions
//! go through the `fieldctl_traits::AnalogIo`/`DigitalIo` capabilities.
//!
//! ## Architecture
//!
//! - **Hall conditioning**: affine volts→Tesla calibration plus optional
//!   moving-average / low-pass filtering (`hall` module)
//! - **Supply driving**: calibrated affine chain field↔current↔program
//!   voltage with clamp, slew limit and enable interlock (`supply` module)
//! - **Control**: setpoint-ramping PID with derivative filtering,
//!   feedforward and anti-windup (`controller` module)
//! - **Telemetry**: per-tick sample assembly (`telemetry`) and CSV +
//!   metadata session files (`logger`)
//! - **Orchestration**: the per-tick pipeline (`rig`) and the paced session
//!   loop with the operator command channel (`runner`)
//!
//! All physical quantities are `f64`: Tesla, Ampere, Volt, seconds.

pub mod controller;
pub mod error;
pub mod hall;
pub mod logger;
pub mod mocks;
pub mod rig;
pub mod runner;
pub mod supply;
pub mod telemetry;
pub mod util;

pub use controller::{ControlFrame, ControllerGains, ControllerLimits, Feedforward, FieldController};
pub use error::{FieldError, Result};
pub use hall::{AnalogInputCfg, FilterMode, HallCalibration, HallConditioner};
pub use logger::{SessionLogger, SessionMeta};
pub use rig::Rig;
pub use runner::{run_session, OperatorCommand, OperatorLink, SessionStats, TickCfg};
pub use supply::{EnableMode, SupplyDriver};
pub use telemetry::{Sample, SamplePublisher};
