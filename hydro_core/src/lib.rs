#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! pH dosing control core (hardware-agnostic).
//!
//! Pumps are driven through `hydro_traits::Actuator`, readings arrive as
//! `hydro_traits::Measurement`, and time comes from `hydro_traits::Clock`.
//!
//! ## Architecture
//!
//! - **State machines**: device, four pumps, sensing and calibration, each with a
//!   legality table and per-state timeouts (`states`, `state_manager`)
//! - **Dosing engine**: PID sizing, safety gates and the dose lifecycle (`pid`, `engine`)
//! - **Sequencer**: maps pump phases to PWM duty and writes it on change (`sequencer`)
//! - **Controller**: owns the pieces above and exposes the command surface (`controller`)
//! - **Runner**: host loop that samples the probe and ticks the controller (`runner`)
//!
//! All time is in milliseconds from the injected clock and arithmetic on it saturates.

pub mod builder;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod engine;
pub mod error;
pub mod fsm;
pub mod hw_error;
pub mod pid;
pub mod pump;
pub mod runner;
pub mod sequencer;
pub mod state_manager;
pub mod states;
pub mod status;
pub mod util;

pub use builder::{ControllerBuilder, Missing, Set, build_controller};
pub use config::{
    ControllerCfg, FlowCfg, Limits, PidCfg, SafetyCfg, SequencerCfg, Timeouts,
};
pub use controller::{Controller, TickReport};
pub use engine::{DoseDecision, DosePlan, DosingEngine};
pub use error::{BuildError, CoreError, GateBlock, Report, Result, TransitionRejected};
pub use fsm::{Machine, MachineState};
pub use hw_error::map_hw_error;
pub use pid::{DoseController, Gains, PidTerms};
pub use pump::PumpId;
pub use runner::{RunParams, RunSummary, run};
pub use sequencer::PumpSequencer;
pub use state_manager::{MachineId, StateManager};
pub use states::{CalibrationState, DeviceState, PumpState, SensorState};
pub use status::{PumpStatus, StatusSnapshot};
