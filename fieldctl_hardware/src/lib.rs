//! fieldctl_hardware: I/O port backends behind `fieldctl_traits`.
//!
//! The default (and currently only) backend is a simulated magnet bench:
//! supply programming input, coil with a first-order lag, and a Hall probe
//! on an analog input. It satisfies `AnalogIo` + `DigitalIo`, so the whole
//! closed loop runs and converges with no hardware attached. The real
//! acquisition-card port lives outside this workspace and only has to
//! implement the same two traits.

pub mod error;

pub mod sim {
    use std::time::Instant;

    use fieldctl_traits::{AnalogIo, AnalogReference, BoxError, DigitalIo};

    use crate::error::HwError;

    /// Physical constants of the simulated bench.
    #[derive(Debug, Clone)]
    pub struct BenchCfg {
        pub hall_channel: u32,
        pub ao_channel: u32,
        pub enable_channel: u32,
        /// Supply transconductance seen from the programming input.
        pub amps_per_volt: f64,
        /// Magnet constant of the simulated coil.
        pub tesla_per_amp: f64,
        pub hall_offset_v: f64,
        pub hall_volts_per_tesla: f64,
        /// Coil L/R time constant; 0 makes the plant instantaneous
        /// (deterministic for tests).
        pub coil_tau_s: f64,
    }

    impl Default for BenchCfg {
        fn default() -> Self {
            Self {
                hall_channel: 0,
                ao_channel: 0,
                enable_channel: 0,
                amps_per_volt: 2.0,
                tesla_per_amp: 0.05,
                hall_offset_v: 0.0,
                hall_volts_per_tesla: 10.0,
                coil_tau_s: 0.05,
            }
        }
    }

    /// Simulated supply + coil + Hall probe behind the port traits.
    #[derive(Debug)]
    pub struct SimulatedBench {
        cfg: BenchCfg,
        /// Current the supply is being asked to source.
        target_i_a: f64,
        /// Present coil current, lagging the target by coil_tau_s.
        i_a: f64,
        interlock_high: bool,
        last_step: Instant,
    }

    impl Default for SimulatedBench {
        fn default() -> Self {
            Self::new(BenchCfg::default())
        }
    }

    impl SimulatedBench {
        pub fn new(cfg: BenchCfg) -> Self {
            Self {
                cfg,
                target_i_a: 0.0,
                i_a: 0.0,
                // Interlock defaults high so benches without a digital
                // enable line still conduct.
                interlock_high: true,
                last_step: Instant::now(),
            }
        }

        pub fn coil_current(&self) -> f64 {
            self.i_a
        }

        pub fn field(&self) -> f64 {
            self.i_a * self.cfg.tesla_per_amp
        }

        pub fn interlock_high(&self) -> bool {
            self.interlock_high
        }

        /// Advance the coil toward its target current.
        fn step_plant(&mut self) {
            let dt = self.last_step.elapsed().as_secs_f64();
            self.last_step = Instant::now();
            let target = if self.interlock_high { self.target_i_a } else { 0.0 };
            if self.cfg.coil_tau_s > 0.0 {
                let k = 1.0 - (-dt / self.cfg.coil_tau_s).exp();
                self.i_a += (target - self.i_a) * k;
            } else {
                self.i_a = target;
            }
        }
    }

    impl AnalogIo for SimulatedBench {
        fn read_input_volts(
            &mut self,
            channel: u32,
            _range_index: u32,
            _aref: AnalogReference,
        ) -> Result<f64, BoxError> {
            if channel != self.cfg.hall_channel {
                return Err(Box::new(HwError::BadInputChannel(channel)));
            }
            self.step_plant();
            let b = self.i_a * self.cfg.tesla_per_amp;
            Ok(self.cfg.hall_offset_v + b * self.cfg.hall_volts_per_tesla)
        }

        fn write_output_volts(
            &mut self,
            channel: u32,
            volts: f64,
            _range_index: u32,
            clamp_min: f64,
            clamp_max: f64,
        ) -> Result<(), BoxError> {
            if channel != self.cfg.ao_channel {
                return Err(Box::new(HwError::BadOutputChannel(channel)));
            }
            self.step_plant();
            let v = volts.clamp(clamp_min, clamp_max);
            self.target_i_a = v * self.cfg.amps_per_volt;
            Ok(())
        }
    }

    impl DigitalIo for SimulatedBench {
        fn write_digital(&mut self, channel: u32, high: bool) -> Result<(), BoxError> {
            if channel != self.cfg.enable_channel {
                return Err(Box::new(HwError::BadDigitalChannel(channel)));
            }
            self.step_plant();
            self.interlock_high = high;
            if !high {
                tracing::debug!("sim interlock opened, coil discharging");
            }
            Ok(())
        }
    }
}

pub use sim::{BenchCfg, SimulatedBench};
