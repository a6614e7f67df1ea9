//! Actuator and probe implementations for the reservoir controller.
//!
//! - `sim`: a reservoir water model shared by a simulated actuator and probe
//! - `replay`: a probe that plays back recorded measurements
//! - `pwm` (feature `hardware`): software PWM on Raspberry Pi GPIO via rppal
pub mod error;
pub mod replay;
pub mod sim;

#[cfg(feature = "hardware")]
pub mod pwm;

pub use error::HwError;
pub use replay::ReplayProbe;
pub use sim::{SimulatedActuator, SimulatedProbe, SimulatedReservoir};

#[cfg(feature = "hardware")]
pub use pwm::PwmActuator;
