//! Pump identities and per-pump bookkeeping.

use std::fmt;
use std::str::FromStr;

use crate::pid::DoseController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpId {
    PhUp,
    PhDown,
    NutrientA,
    NutrientB,
}

impl PumpId {
    pub const ALL: [PumpId; 4] = [
        PumpId::PhUp,
        PumpId::PhDown,
        PumpId::NutrientA,
        PumpId::NutrientB,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            PumpId::PhUp => 0,
            PumpId::PhDown => 1,
            PumpId::NutrientA => 2,
            PumpId::NutrientB => 3,
        }
    }

    /// Short machine-friendly name, also accepted by `FromStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            PumpId::PhUp => "ph_up",
            PumpId::PhDown => "ph_down",
            PumpId::NutrientA => "nutrient_a",
            PumpId::NutrientB => "nutrient_b",
        }
    }
}

impl fmt::Display for PumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PumpId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('-', "_");
        PumpId::ALL
            .into_iter()
            .find(|p| p.as_str() == norm)
            .ok_or_else(|| {
                format!("unknown pump '{s}' (expected ph_up, ph_down, nutrient_a or nutrient_b)")
            })
    }
}

/// Runtime record for one pump. The pump's state itself lives in the
/// `StateManager`; this holds what the sequencer and gates need.
#[derive(Debug, Clone)]
pub struct PumpRecord {
    pub id: PumpId,
    /// Actuator output channel.
    pub channel: u8,
    /// Duty applied while Dosing.
    pub target_duty: u8,
    /// Time to spend in Dosing for the current run.
    pub run_duration_ms: u64,
    pub running: bool,
    /// Last duty the actuator accepted; `None` until the first successful write.
    pub output_duty: Option<u8>,
    /// Flow rate of an open-ended manual run, if one is in progress.
    pub manual_rate_ml_min: Option<f32>,
    pub controller: DoseController,
}

impl PumpRecord {
    pub fn new(id: PumpId, channel: u8, controller: DoseController) -> Self {
        Self {
            id,
            channel,
            target_duty: 0,
            run_duration_ms: 0,
            running: false,
            output_duty: None,
            manual_rate_ml_min: None,
            controller,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_loosely() {
        assert_eq!("ph_up".parse::<PumpId>(), Ok(PumpId::PhUp));
        assert_eq!("PH-DOWN".parse::<PumpId>(), Ok(PumpId::PhDown));
        assert_eq!(" nutrient_b ".parse::<PumpId>(), Ok(PumpId::NutrientB));
        assert!("acid".parse::<PumpId>().is_err());
    }

    #[test]
    fn indices_match_all_order() {
        for (i, p) in PumpId::ALL.into_iter().enumerate() {
            assert_eq!(p.index(), i);
        }
    }
}
