//! `From` implementations bridging `hydro_config` types to `hydro_core` types.

use hydro_traits::Measurement;

use crate::config::{
    ControllerCfg, FlowCfg, Limits, PidCfg, SafetyCfg, SequencerCfg, Timeouts,
};
use crate::pid::Gains;

// ── PidCfg ───────────────────────────────────────────────────────────────────

impl From<&hydro_config::PidCfg> for PidCfg {
    fn from(c: &hydro_config::PidCfg) -> Self {
        Self {
            gains: Gains {
                kp: c.kp,
                ki: c.ki,
                kd: c.kd,
            },
            setpoint_ph: c.setpoint_ph,
            integral_limit: c.integral_limit,
        }
    }
}

// ── SafetyCfg ────────────────────────────────────────────────────────────────

impl From<&hydro_config::Safety> for SafetyCfg {
    fn from(c: &hydro_config::Safety) -> Self {
        Self {
            min_dose_interval_ms: c.min_dose_interval_ms,
            max_doses_per_hour: c.max_doses_per_hour,
            hour_window_ms: c.hour_window_ms,
            min_dose_ml: c.min_dose_ml,
            max_dose_ml: c.max_dose_ml,
            max_run_ms: c.max_run_ms,
            priming_timeout_ms: c.priming_timeout_ms,
            pump_error_recovery_ms: c.pump_error_recovery_ms,
        }
    }
}

// ── FlowCfg ──────────────────────────────────────────────────────────────────

impl From<&hydro_config::FlowCfg> for FlowCfg {
    fn from(c: &hydro_config::FlowCfg) -> Self {
        Self {
            min_rate_ml_min: c.min_rate_ml_min,
            max_rate_ml_min: c.max_rate_ml_min,
            default_rate_ml_min: c.default_rate_ml_min,
            min_duty_pct: c.min_duty_pct,
        }
    }
}

// ── SequencerCfg ─────────────────────────────────────────────────────────────

impl From<&hydro_config::SequencerCfg> for SequencerCfg {
    fn from(c: &hydro_config::SequencerCfg) -> Self {
        Self {
            priming_ms: c.priming_ms,
            priming_duty_pct: c.priming_duty_pct,
        }
    }
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

impl From<&hydro_config::Timeouts> for Timeouts {
    fn from(c: &hydro_config::Timeouts) -> Self {
        Self {
            device_error_recovery_ms: c.device_error_recovery_ms,
            cooldown_ms: c.cooldown_ms,
            sensor_error_recovery_ms: c.sensor_error_recovery_ms,
            sensor_warmup_timeout_ms: c.sensor_warmup_timeout_ms,
            status_interval_ms: c.status_interval_ms,
        }
    }
}

// ── Limits ───────────────────────────────────────────────────────────────────

impl From<&hydro_config::Limits> for Limits {
    fn from(c: &hydro_config::Limits) -> Self {
        Self {
            ph_min: c.ph_min,
            ph_max: c.ph_max,
            volume_min_l: c.volume_min_l,
            volume_max_l: c.volume_max_l,
        }
    }
}

// ── ControllerCfg ────────────────────────────────────────────────────────────

impl From<&hydro_config::Config> for ControllerCfg {
    fn from(c: &hydro_config::Config) -> Self {
        Self {
            pid: (&c.pid).into(),
            safety: (&c.safety).into(),
            flow: (&c.flow).into(),
            sequencer: (&c.sequencer).into(),
            timeouts: (&c.timeouts).into(),
            limits: (&c.limits).into(),
            channels: c.channels.as_array(),
            max_invalid_readings: c.runner.max_invalid_readings,
        }
    }
}

// ── Measurement ──────────────────────────────────────────────────────────────

/// Turn a recorded CSV row into a valid measurement stamped at `timestamp`.
pub fn measurement_from_row(row: &hydro_config::MeasurementRow, timestamp: u64) -> Measurement {
    Measurement {
        ph: row.ph,
        conductivity: row.conductivity,
        volume_liters: row.volume_liters,
        temperature: row.temperature,
        timestamp,
        valid: true,
    }
}
