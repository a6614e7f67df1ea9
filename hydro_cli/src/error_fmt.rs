//! Human-readable error descriptions and structured JSON error formatting.

use std::fmt;

use hydro_core::TransitionRejected;
use hydro_core::error::{BuildError, CoreError, GateBlock};

/// A command cut short by Ctrl-C.
#[derive(Debug)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("interrupted by signal")
    }
}

impl std::error::Error for Interrupted {}

fn gate_hint(block: &GateBlock) -> &'static str {
    match block {
        GateBlock::PumpBusy(_) => {
            "Wait for the current run and its cool-down to finish, or stop the pump first."
        }
        GateBlock::IntervalNotElapsed { .. } => {
            "Wait for the minimum dose interval, or lower safety.min_dose_interval_ms."
        }
        GateBlock::HourlyQuotaReached { .. } => {
            "Wait for the hour window to roll over, or raise safety.max_doses_per_hour."
        }
        GateBlock::DeviceMode(_) => {
            "Leave maintenance or calibration, or recover the device from error first."
        }
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingActuator => {
                "What happened: No pump output stage was provided to the controller.\nLikely causes: PWM outputs failed to initialize or were not wired into the builder.\nHow to fix: Check the [pins] section and GPIO permissions.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range or inconsistent values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/hydro_config.toml for a sample."
            ),
        };
    }

    if err.downcast_ref::<Interrupted>().is_some() {
        return "What happened: Interrupted by Ctrl-C.\nLikely causes: Operator request.\nHow to fix: Nothing to fix; all pumps were stopped.".to_string();
    }

    if let Some(t) = err.downcast_ref::<TransitionRejected>() {
        return format!(
            "What happened: The controller refused a state change ({t}).\nLikely causes: The command is not valid in the current mode.\nHow to fix: Check `hydro transitions` and the current status."
        );
    }

    if let Some(ce) = err.downcast_ref::<CoreError>() {
        return match ce {
            CoreError::SafetyGateBlocked(block) => format!(
                "What happened: Dose refused by a safety gate ({block}).\nLikely causes: Normal rate limiting.\nHow to fix: {}",
                gate_hint(block)
            ),
            CoreError::HardTimeout { pump, phase, elapsed_ms } => format!(
                "What happened: {pump} was forced off after {elapsed_ms} ms in {phase}.\nLikely causes: Stalled pump, blocked tubing, or a run longer than safety.max_run_ms.\nHow to fix: Inspect the pump and tubing; the pump recovers automatically after safety.pump_error_recovery_ms."
            ),
            CoreError::Timeout => "What happened: Probe read timed out.\nLikely causes: Sensor not connected or runner.probe_timeout_ms too low.\nHow to fix: Check the probe wiring and raise runner.probe_timeout_ms.".to_string(),
            CoreError::Hardware(msg) | CoreError::HardwareFault(msg) => format!(
                "What happened: Hardware error ({msg}).\nLikely causes: GPIO permissions, wrong pin numbers, or a disconnected driver.\nHow to fix: Check the [pins] values and that the process can access GPIO."
            ),
            CoreError::InvalidMeasurement { .. } => format!(
                "What happened: {ce}.\nLikely causes: Probe out of calibration or reservoir level outside limits.\nHow to fix: Recalibrate the probe or adjust the [limits] section."
            ),
            _ => format!(
                "What happened: {ce}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    let chain = format!("{err:#}");

    if lower.contains("measurement csv must have headers") {
        return "Invalid headers in measurement CSV. Expected 'ph,conductivity,volume_liters,temperature'.".to_string();
    }

    if lower.contains("must be") || lower.contains("parse config") {
        return format!(
            "What happened: Configuration is invalid ({chain}).\nLikely causes: A value is missing, mistyped or out of range.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("read config") || lower.contains("open measurement csv") {
        return format!(
            "What happened: Could not read an input file ({chain}).\nLikely causes: Wrong path or missing permissions.\nHow to fix: Check the path passed on the command line."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: safety refusals, pump timeouts and hardware faults get their own.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<Interrupted>().is_some() {
        return 130;
    }
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::SafetyGateBlocked(_)) => 3,
        Some(CoreError::HardTimeout { .. }) => 4,
        Some(CoreError::Timeout | CoreError::Hardware(_) | CoreError::HardwareFault(_)) => 5,
        _ => 1,
    }
}

pub fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<Interrupted>().is_some() {
        return "Interrupted";
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "InvalidConfig";
    }
    if err.downcast_ref::<TransitionRejected>().is_some() {
        return "TransitionRejected";
    }
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::SafetyGateBlocked(_)) => "SafetyGateBlocked",
        Some(CoreError::HardTimeout { .. }) => "HardTimeout",
        Some(CoreError::Timeout) => "Timeout",
        Some(CoreError::Hardware(_) | CoreError::HardwareFault(_)) => "Hardware",
        Some(CoreError::InvalidMeasurement { .. }) => "InvalidMeasurement",
        Some(CoreError::TransitionRejected(_)) => "TransitionRejected",
        Some(CoreError::DeviceFault(_)) => "DeviceFault",
        Some(CoreError::Config(_)) => "InvalidConfig",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    let reason = reason_name(err);
    let details = match err.downcast_ref::<CoreError>() {
        Some(CoreError::SafetyGateBlocked(GateBlock::IntervalNotElapsed { remaining_ms })) => {
            Some(json!({ "remaining_ms": remaining_ms }))
        }
        Some(CoreError::SafetyGateBlocked(GateBlock::HourlyQuotaReached { doses })) => {
            Some(json!({ "doses": doses }))
        }
        Some(CoreError::HardTimeout {
            pump,
            phase,
            elapsed_ms,
        }) => Some(json!({
            "pump": pump.as_str(),
            "phase": phase.to_string(),
            "elapsed_ms": elapsed_ms,
        })),
        _ => None,
    };

    match details {
        Some(d) => json!({ "reason": reason, "details": d, "message": msg }).to_string(),
        None => json!({ "reason": reason, "message": msg }).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_core::{PumpId, PumpState};

    #[test]
    fn gate_refusal_gets_its_own_exit_code() {
        let err = eyre::Report::new(CoreError::SafetyGateBlocked(
            GateBlock::HourlyQuotaReached { doses: 3 },
        ));
        assert_eq!(exit_code_for_error(&err), 3);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "SafetyGateBlocked");
        assert_eq!(v["details"]["doses"], 3);
        assert!(humanize(&err).contains("max_doses_per_hour"));
    }

    #[test]
    fn hard_timeout_names_pump_and_phase() {
        let err = eyre::Report::new(CoreError::HardTimeout {
            pump: PumpId::PhDown,
            phase: PumpState::Priming,
            elapsed_ms: 5_001,
        });
        assert_eq!(exit_code_for_error(&err), 4);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["details"]["pump"], "ph_down");
        assert_eq!(v["details"]["phase"], "PRIMING");
    }

    #[test]
    fn config_validation_message_is_kept() {
        let err = eyre::eyre!("pid.kp must be > 0");
        let h = humanize(&err);
        assert!(h.contains("Configuration is invalid"));
        assert!(h.contains("pid.kp"));
        assert_eq!(exit_code_for_error(&err), 1);
    }

    #[test]
    fn interrupted_exits_130() {
        let err = eyre::Report::new(Interrupted);
        assert_eq!(exit_code_for_error(&err), 130);
        assert_eq!(reason_name(&err), "Interrupted");
    }
}
