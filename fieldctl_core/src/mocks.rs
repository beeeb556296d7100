//! Test and helper mocks for fieldctl_core.

use std::collections::VecDeque;

use fieldctl_traits::{AnalogIo, AnalogReference, BoxError, DigitalIo};

/// Scripted I/O port: serves queued analog-input voltages (repeating the
/// last one when the queue drains) and records every analog/digital write.
/// Reads and writes can be made to fail for fault-path tests.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    ai_queue: VecDeque<f64>,
    last_ai_v: f64,
    pub ao_writes: Vec<(u32, f64)>,
    pub digital_writes: Vec<(u32, bool)>,
    pub fail_reads: bool,
    pub fail_writes: bool,
}

impl ScriptedPort {
    /// Port whose analog input always reads `volts`.
    pub fn constant(volts: f64) -> Self {
        Self {
            last_ai_v: volts,
            ..Self::default()
        }
    }

    /// Port that plays back `seq` on the analog input, then repeats the
    /// final value.
    pub fn sequence(seq: impl Into<VecDeque<f64>>) -> Self {
        let ai_queue: VecDeque<f64> = seq.into();
        let last_ai_v = ai_queue.back().copied().unwrap_or(0.0);
        Self {
            ai_queue,
            last_ai_v,
            ..Self::default()
        }
    }

    /// Overwrite what the analog input reads from now on.
    pub fn set_input(&mut self, volts: f64) {
        self.ai_queue.clear();
        self.last_ai_v = volts;
    }

    /// Most recent analog output write, if any.
    pub fn last_ao(&self) -> Option<f64> {
        self.ao_writes.last().map(|(_, v)| *v)
    }

    /// Most recent digital write, if any.
    pub fn last_digital(&self) -> Option<(u32, bool)> {
        self.digital_writes.last().copied()
    }
}

impl AnalogIo for ScriptedPort {
    fn read_input_volts(
        &mut self,
        _channel: u32,
        _range_index: u32,
        _aref: AnalogReference,
    ) -> Result<f64, BoxError> {
        if self.fail_reads {
            return Err(Box::new(std::io::Error::other("scripted read failure")));
        }
        if let Some(v) = self.ai_queue.pop_front() {
            self.last_ai_v = v;
        }
        Ok(self.last_ai_v)
    }

    fn write_output_volts(
        &mut self,
        channel: u32,
        volts: f64,
        _range_index: u32,
        clamp_min: f64,
        clamp_max: f64,
    ) -> Result<(), BoxError> {
        if self.fail_writes {
            return Err(Box::new(std::io::Error::other("scripted write failure")));
        }
        // Mirror the hardware-side clamp the real device applies.
        self.ao_writes.push((channel, volts.clamp(clamp_min, clamp_max)));
        Ok(())
    }
}

impl DigitalIo for ScriptedPort {
    fn write_digital(&mut self, channel: u32, high: bool) -> Result<(), BoxError> {
        if self.fail_writes {
            return Err(Box::new(std::io::Error::other("scripted write failure")));
        }
        self.digital_writes.push((channel, high));
        Ok(())
    }
}
