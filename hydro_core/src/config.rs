//! Runtime configuration for the controller.
//!
//! These are the structs the core runs on. They are separate from the
//! TOML-deserialized config in `hydro_config`; see `conversions` for the bridge.
//! Defaults are the stock constants of the controller.

use crate::pid::Gains;
use crate::pump::PumpId;

/// Feedback law parameters.
#[derive(Debug, Clone, Copy)]
pub struct PidCfg {
    pub gains: Gains,
    /// Initial pH set-point.
    pub setpoint_ph: f32,
    /// Symmetric bound on the integral accumulator.
    pub integral_limit: f32,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            gains: Gains::default(),
            setpoint_ph: 6.0,
            integral_limit: 50.0,
        }
    }
}

/// Safety gates and hard limits applied to every pump.
#[derive(Debug, Clone, Copy)]
pub struct SafetyCfg {
    pub min_dose_interval_ms: u64,
    pub max_doses_per_hour: u32,
    pub hour_window_ms: u64,
    pub min_dose_ml: f32,
    pub max_dose_ml: f32,
    /// Absolute ceiling on time in Dosing.
    pub max_run_ms: u64,
    pub priming_timeout_ms: u64,
    pub pump_error_recovery_ms: u64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            min_dose_interval_ms: 300_000,
            max_doses_per_hour: 3,
            hour_window_ms: 3_600_000,
            min_dose_ml: 5.0,
            max_dose_ml: 25.0,
            max_run_ms: 600_000,
            priming_timeout_ms: 5_000,
            pump_error_recovery_ms: 30_000,
        }
    }
}

/// Pump flow characteristics used by the duty mapping.
#[derive(Debug, Clone, Copy)]
pub struct FlowCfg {
    pub min_rate_ml_min: f32,
    pub max_rate_ml_min: f32,
    pub default_rate_ml_min: f32,
    /// Duty percentage at `min_rate_ml_min`; `max_rate_ml_min` maps to 100%.
    pub min_duty_pct: f32,
}

impl Default for FlowCfg {
    fn default() -> Self {
        Self {
            min_rate_ml_min: 5.2,
            max_rate_ml_min: 90.0,
            default_rate_ml_min: 30.0,
            min_duty_pct: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SequencerCfg {
    pub priming_ms: u64,
    pub priming_duty_pct: f32,
}

impl Default for SequencerCfg {
    fn default() -> Self {
        Self {
            priming_ms: 2_500,
            priming_duty_pct: 25.0,
        }
    }
}

/// State Manager sweep timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub device_error_recovery_ms: u64,
    pub cooldown_ms: u64,
    pub sensor_error_recovery_ms: u64,
    pub sensor_warmup_timeout_ms: u64,
    pub status_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            device_error_recovery_ms: 5_000,
            cooldown_ms: 300_000,
            sensor_error_recovery_ms: 10_000,
            sensor_warmup_timeout_ms: 5_000,
            status_interval_ms: 30_000,
        }
    }
}

/// Accepted measurement ranges.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub ph_min: f32,
    pub ph_max: f32,
    pub volume_min_l: f32,
    pub volume_max_l: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            ph_min: 4.0,
            ph_max: 9.0,
            volume_min_l: 5.0,
            volume_max_l: 200.0,
        }
    }
}

/// Everything a `Controller` needs besides its actuator and clock.
#[derive(Debug, Clone, Copy)]
pub struct ControllerCfg {
    pub pid: PidCfg,
    pub safety: SafetyCfg,
    pub flow: FlowCfg,
    pub sequencer: SequencerCfg,
    pub timeouts: Timeouts,
    pub limits: Limits,
    /// Actuator channel per pump, indexed by `PumpId::index`.
    pub channels: [u8; 4],
    /// Consecutive invalid readings tolerated before the device enters Error.
    pub max_invalid_readings: u32,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            pid: PidCfg::default(),
            safety: SafetyCfg::default(),
            flow: FlowCfg::default(),
            sequencer: SequencerCfg::default(),
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            channels: [0, 1, 2, 3],
            max_invalid_readings: 3,
        }
    }
}

impl ControllerCfg {
    #[inline]
    pub fn channel(&self, pump: PumpId) -> u8 {
        self.channels[pump.index()]
    }
}
