//! Point-in-time view of the controller for operators and logs.

use std::fmt;

use crate::pid::Gains;
use crate::pump::PumpId;
use crate::states::{CalibrationState, DeviceState, PumpState, SensorState};
use crate::util::secs;

#[derive(Debug, Clone, PartialEq)]
pub struct PumpStatus {
    pub pump: PumpId,
    pub state: PumpState,
    pub in_state_ms: u64,
    pub running: bool,
    /// Duty last accepted by the actuator.
    pub duty: u8,
    /// Time left in the current timed phase (priming, dosing, cool-down).
    pub remaining_ms: Option<u64>,
    pub doses_this_hour: u32,
    pub max_doses_per_hour: u32,
    /// Time until the minimum dose spacing is met.
    pub next_dose_in_ms: u64,
    pub total_dosed_ml: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub now_ms: u64,
    pub device: DeviceState,
    pub device_ms: u64,
    pub sensor: SensorState,
    pub sensor_ms: u64,
    pub calibration: CalibrationState,
    pub auto_enabled: bool,
    pub target_ph: f32,
    pub gains: Gains,
    pub pumps: Vec<PumpStatus>,
}

impl fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {:<12} {:>7.1}s  duty {:>3}",
            self.pump.as_str(),
            self.state.to_string(),
            secs(self.in_state_ms),
            self.duty
        )?;
        if let Some(r) = self.remaining_ms {
            write!(f, "  remaining {:.1}s", secs(r))?;
        }
        write!(
            f,
            "  doses {}/{} this hour",
            self.doses_this_hour, self.max_doses_per_hour
        )?;
        if self.next_dose_in_ms > 0 {
            write!(f, "  next in {:.0}s", secs(self.next_dose_in_ms))?;
        }
        write!(f, "  total {:.1} ml", self.total_dosed_ml)
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== status @ {} ms ===", self.now_ms)?;
        writeln!(f, "device: {} ({:.1}s)", self.device, secs(self.device_ms))?;
        writeln!(
            f,
            "sensor: {} ({:.1}s)  calibration: {}",
            self.sensor,
            secs(self.sensor_ms),
            self.calibration
        )?;
        writeln!(
            f,
            "auto: {}  target pH: {:.2}  pid: kp={:.2} ki={:.2} kd={:.2}",
            if self.auto_enabled { "on" } else { "off" },
            self.target_ph,
            self.gains.kp,
            self.gains.ki,
            self.gains.kd
        )?;
        for (i, p) in self.pumps.iter().enumerate() {
            if i + 1 == self.pumps.len() {
                write!(f, "{p}")?;
            } else {
                writeln!(f, "{p}")?;
            }
        }
        Ok(())
    }
}
