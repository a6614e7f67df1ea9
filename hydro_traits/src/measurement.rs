//! Measurement record handed from the sensing side to the controller.

/// One filtered reading of the reservoir.
///
/// `valid` is set by the sensing side; the controller additionally range-checks
/// pH and volume before acting on a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub ph: f32,
    /// Electrical conductivity in mS/cm.
    pub conductivity: f32,
    pub volume_liters: f32,
    /// Water temperature in °C.
    pub temperature: f32,
    /// Clock milliseconds at which the reading was taken.
    pub timestamp: u64,
    pub valid: bool,
}

impl Measurement {
    /// A valid reading with neutral conductivity and temperature.
    pub fn new(ph: f32, volume_liters: f32, timestamp: u64) -> Self {
        Self {
            ph,
            conductivity: 1.0,
            volume_liters,
            temperature: 25.0,
            timestamp,
            valid: true,
        }
    }

    /// A reading the sensing side flagged as unusable.
    pub fn invalid(timestamp: u64) -> Self {
        Self {
            ph: 0.0,
            conductivity: 0.0,
            volume_liters: 0.0,
            temperature: 0.0,
            timestamp,
            valid: false,
        }
    }
}
