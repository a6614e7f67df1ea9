//! State enums for the four machines and their legality tables.

use std::fmt;

use crate::fsm::MachineState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Startup,
    Initializing,
    Monitoring,
    Dosing,
    Calibrating,
    Error,
    Maintenance,
    Shutdown,
}

impl DeviceState {
    pub const ALL: [DeviceState; 8] = [
        DeviceState::Startup,
        DeviceState::Initializing,
        DeviceState::Monitoring,
        DeviceState::Dosing,
        DeviceState::Calibrating,
        DeviceState::Error,
        DeviceState::Maintenance,
        DeviceState::Shutdown,
    ];

    /// Device modes in which doses may be accepted.
    pub fn accepts_doses(self) -> bool {
        matches!(self, DeviceState::Monitoring | DeviceState::Dosing)
    }
}

impl MachineState for DeviceState {
    const MACHINE: &'static str = "device";

    fn label(self) -> &'static str {
        match self {
            DeviceState::Startup => "STARTUP",
            DeviceState::Initializing => "INITIALIZING",
            DeviceState::Monitoring => "MONITORING",
            DeviceState::Dosing => "DOSING",
            DeviceState::Calibrating => "CALIBRATING",
            DeviceState::Error => "ERROR",
            DeviceState::Maintenance => "MAINTENANCE",
            DeviceState::Shutdown => "SHUTDOWN",
        }
    }

    fn is_escape(self) -> bool {
        matches!(
            self,
            DeviceState::Error | DeviceState::Maintenance | DeviceState::Shutdown
        )
    }

    fn successors(self) -> &'static [Self] {
        use DeviceState::*;
        match self {
            Startup => &[Initializing],
            Initializing => &[Monitoring],
            Monitoring => &[Dosing, Calibrating],
            Dosing | Calibrating | Maintenance => &[Monitoring],
            Error => &[Monitoring, Initializing],
            Shutdown => &[Startup],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpState {
    Idle,
    Priming,
    Dosing,
    CoolingDown,
    Error,
    Maintenance,
}

impl PumpState {
    pub const ALL: [PumpState; 6] = [
        PumpState::Idle,
        PumpState::Priming,
        PumpState::Dosing,
        PumpState::CoolingDown,
        PumpState::Error,
        PumpState::Maintenance,
    ];

    /// States in which the sequencer energizes the pump.
    pub fn drives_output(self) -> bool {
        matches!(self, PumpState::Priming | PumpState::Dosing)
    }
}

impl MachineState for PumpState {
    const MACHINE: &'static str = "pump";

    fn label(self) -> &'static str {
        match self {
            PumpState::Idle => "IDLE",
            PumpState::Priming => "PRIMING",
            PumpState::Dosing => "DOSING",
            PumpState::CoolingDown => "COOLING_DOWN",
            PumpState::Error => "ERROR",
            PumpState::Maintenance => "MAINTENANCE",
        }
    }

    fn is_escape(self) -> bool {
        matches!(
            self,
            PumpState::Idle | PumpState::Error | PumpState::Maintenance
        )
    }

    fn successors(self) -> &'static [Self] {
        match self {
            PumpState::Idle => &[PumpState::Priming],
            PumpState::Priming => &[PumpState::Dosing],
            PumpState::Dosing => &[PumpState::CoolingDown],
            PumpState::CoolingDown | PumpState::Error | PumpState::Maintenance => {
                &[PumpState::Idle]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorState {
    Initializing,
    WarmingUp,
    Reading,
    Filtering,
    Ready,
    Error,
}

impl SensorState {
    pub const ALL: [SensorState; 6] = [
        SensorState::Initializing,
        SensorState::WarmingUp,
        SensorState::Reading,
        SensorState::Filtering,
        SensorState::Ready,
        SensorState::Error,
    ];
}

impl MachineState for SensorState {
    const MACHINE: &'static str = "sensor";

    fn label(self) -> &'static str {
        match self {
            SensorState::Initializing => "INITIALIZING",
            SensorState::WarmingUp => "WARMING_UP",
            SensorState::Reading => "READING",
            SensorState::Filtering => "FILTERING",
            SensorState::Ready => "READY",
            SensorState::Error => "ERROR",
        }
    }

    fn is_escape(self) -> bool {
        matches!(self, SensorState::Error)
    }

    fn successors(self) -> &'static [Self] {
        use SensorState::*;
        match self {
            Initializing => &[Ready],
            Ready => &[WarmingUp],
            WarmingUp => &[Reading],
            Reading => &[Filtering],
            Filtering => &[Ready],
            Error => &[Initializing, Ready],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationState {
    Idle,
    Active,
}

impl CalibrationState {
    pub const ALL: [CalibrationState; 2] = [CalibrationState::Idle, CalibrationState::Active];
}

impl MachineState for CalibrationState {
    const MACHINE: &'static str = "calibration";

    fn label(self) -> &'static str {
        match self {
            CalibrationState::Idle => "IDLE",
            CalibrationState::Active => "ACTIVE",
        }
    }

    fn is_escape(self) -> bool {
        matches!(self, CalibrationState::Idle)
    }

    fn successors(self) -> &'static [Self] {
        match self {
            CalibrationState::Idle => &[CalibrationState::Active],
            CalibrationState::Active => &[CalibrationState::Idle],
        }
    }
}

macro_rules! display_label {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        })*
    };
}

display_label!(DeviceState, PumpState, SensorState, CalibrationState);
