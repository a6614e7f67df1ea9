use thiserror::Error;

use crate::pump::PumpId;
use crate::states::{DeviceState, PumpState};

/// A state-machine edge that the legality table does not permit.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{machine}: transition {from} -> {to} is not permitted")]
pub struct TransitionRejected {
    pub machine: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

/// Why a dose request was held back. These are normal operating constraints.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum GateBlock {
    #[error("pump is busy ({0})")]
    PumpBusy(PumpState),
    #[error("minimum dose interval not elapsed ({remaining_ms} ms remaining)")]
    IntervalNotElapsed { remaining_ms: u64 },
    #[error("hourly dose quota reached ({doses} doses)")]
    HourlyQuotaReached { doses: u32 },
    #[error("device is not accepting doses ({0})")]
    DeviceMode(DeviceState),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid measurement: {field} = {value} outside [{min}, {max}]")]
    InvalidMeasurement {
        field: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error(transparent)]
    TransitionRejected(#[from] TransitionRejected),
    #[error("dose blocked: {0}")]
    SafetyGateBlocked(#[from] GateBlock),
    #[error("{pump} exceeded {phase} limit after {elapsed_ms} ms")]
    HardTimeout {
        pump: PumpId,
        phase: PumpState,
        elapsed_ms: u64,
    },
    #[error("device fault: {0}")]
    DeviceFault(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for probe")]
    Timeout,
    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing actuator")]
    MissingActuator,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
