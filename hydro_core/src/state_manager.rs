//! Authoritative state of the device, the four pumps, the sensing subsystem
//! and the calibration mode.
//!
//! Every request goes through the legality table of its machine; every
//! accepted transition restamps the machine's entry time. `sweep_timeouts`
//! resolves states that have overstayed, `emergency_stop` overrides all of it.

use crate::config::Timeouts;
use crate::error::{CoreError, TransitionRejected};
use crate::fsm::{Machine, MachineState};
use crate::pump::PumpId;
use crate::states::{CalibrationState, DeviceState, PumpState, SensorState};

/// Selects one machine for timing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineId {
    Device,
    Pump(PumpId),
    Sensor,
    Calibration,
}

#[derive(Debug, Clone)]
pub struct StateManager {
    device: Machine<DeviceState>,
    pumps: [Machine<PumpState>; 4],
    sensor: Machine<SensorState>,
    calibration: Machine<CalibrationState>,
    timeouts: Timeouts,
    max_run_ms: u64,
    verbose: bool,
    last_status_ms: u64,
}

fn log_accepted<S: MachineState>(verbose: bool, pump: Option<PumpId>, from: S, to: S) {
    let pump = pump.map(PumpId::as_str).unwrap_or("-");
    if verbose {
        tracing::info!(
            machine = S::MACHINE,
            pump,
            from = from.label(),
            to = to.label(),
            "state transition"
        );
    } else {
        tracing::trace!(
            machine = S::MACHINE,
            pump,
            from = from.label(),
            to = to.label(),
            "state transition"
        );
    }
}

fn log_rejected(pump: Option<PumpId>, err: &TransitionRejected) {
    tracing::warn!(
        machine = err.machine,
        pump = pump.map(PumpId::as_str).unwrap_or("-"),
        from = err.from,
        to = err.to,
        "transition rejected"
    );
}

fn apply<S: MachineState>(
    m: &mut Machine<S>,
    to: S,
    now_ms: u64,
    verbose: bool,
    pump: Option<PumpId>,
) -> Result<S, TransitionRejected> {
    match m.transition(to, now_ms) {
        Ok(prev) => {
            log_accepted(verbose, pump, prev, to);
            Ok(prev)
        }
        Err(e) => {
            log_rejected(pump, &e);
            Err(e)
        }
    }
}

impl StateManager {
    pub fn new(timeouts: Timeouts, max_run_ms: u64, now_ms: u64) -> Self {
        let mut sm = Self {
            device: Machine::new(DeviceState::Startup, now_ms),
            pumps: [Machine::new(PumpState::Idle, now_ms); 4],
            sensor: Machine::new(SensorState::Initializing, now_ms),
            calibration: Machine::new(CalibrationState::Idle, now_ms),
            timeouts,
            max_run_ms,
            verbose: true,
            last_status_ms: now_ms,
        };
        sm.initialize(now_ms);
        sm
    }

    /// Reset every machine to its boot state and enable verbose transition logging.
    pub fn initialize(&mut self, now_ms: u64) {
        self.device = Machine::new(DeviceState::Startup, now_ms);
        self.pumps = [Machine::new(PumpState::Idle, now_ms); 4];
        self.sensor = Machine::new(SensorState::Initializing, now_ms);
        self.calibration = Machine::new(CalibrationState::Idle, now_ms);
        self.verbose = true;
        self.last_status_ms = now_ms;
        tracing::debug!(now_ms, "state manager initialized");
    }

    pub fn device(&self) -> DeviceState {
        self.device.state()
    }

    pub fn pump(&self, id: PumpId) -> PumpState {
        self.pumps[id.index()].state()
    }

    pub fn sensor(&self) -> SensorState {
        self.sensor.state()
    }

    pub fn calibration(&self) -> CalibrationState {
        self.calibration.state()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
        tracing::info!(verbose, "transition logging changed");
    }

    pub fn transition_device(
        &mut self,
        to: DeviceState,
        now_ms: u64,
    ) -> Result<DeviceState, TransitionRejected> {
        apply(&mut self.device, to, now_ms, self.verbose, None)
    }

    pub fn transition_pump(
        &mut self,
        id: PumpId,
        to: PumpState,
        now_ms: u64,
    ) -> Result<PumpState, TransitionRejected> {
        apply(&mut self.pumps[id.index()], to, now_ms, self.verbose, Some(id))
    }

    pub fn transition_sensor(
        &mut self,
        to: SensorState,
        now_ms: u64,
    ) -> Result<SensorState, TransitionRejected> {
        apply(&mut self.sensor, to, now_ms, self.verbose, None)
    }

    pub fn transition_calibration(
        &mut self,
        to: CalibrationState,
        now_ms: u64,
    ) -> Result<CalibrationState, TransitionRejected> {
        apply(&mut self.calibration, to, now_ms, self.verbose, None)
    }

    pub fn entered_ms(&self, machine: MachineId) -> u64 {
        match machine {
            MachineId::Device => self.device.entered_ms(),
            MachineId::Pump(id) => self.pumps[id.index()].entered_ms(),
            MachineId::Sensor => self.sensor.entered_ms(),
            MachineId::Calibration => self.calibration.entered_ms(),
        }
    }

    /// `now - entry time` of the selected machine, saturating at zero.
    pub fn duration_in_state(&self, machine: MachineId, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_ms(machine))
    }

    /// Resolve expired states, in order: device error recovery, maintenance
    /// hold, pump cool-down and run ceiling, sensing recovery and warm-up stall.
    ///
    /// Returns the faults raised during the sweep.
    pub fn sweep_timeouts(&mut self, now_ms: u64) -> Vec<CoreError> {
        let mut faults = Vec::new();
        let t = self.timeouts;

        if self.device() == DeviceState::Error
            && self.device.elapsed(now_ms) > t.device_error_recovery_ms
        {
            let stuck_ms = self.device.elapsed(now_ms);
            if self
                .transition_device(DeviceState::Monitoring, now_ms)
                .is_ok()
            {
                tracing::info!(after_ms = stuck_ms, "device recovered from error");
            }
        }

        self.hold_for_maintenance(now_ms);

        for id in PumpId::ALL {
            let elapsed = self.pumps[id.index()].elapsed(now_ms);
            match self.pump(id) {
                PumpState::CoolingDown if elapsed > t.cooldown_ms => {
                    if self.transition_pump(id, PumpState::Idle, now_ms).is_ok() {
                        tracing::info!(pump = %id, "cool-down complete");
                    }
                }
                PumpState::Dosing if elapsed > self.max_run_ms => {
                    let _ = self.transition_pump(id, PumpState::Error, now_ms);
                    tracing::error!(
                        pump = %id,
                        elapsed_ms = elapsed,
                        limit_ms = self.max_run_ms,
                        "pump exceeded run ceiling; forced to error"
                    );
                    faults.push(CoreError::HardTimeout {
                        pump: id,
                        phase: PumpState::Dosing,
                        elapsed_ms: elapsed,
                    });
                }
                _ => {}
            }
        }

        let sensor_elapsed = self.sensor.elapsed(now_ms);
        match self.sensor() {
            SensorState::Error if sensor_elapsed > t.sensor_error_recovery_ms => {
                if self.transition_sensor(SensorState::Ready, now_ms).is_ok() {
                    tracing::info!(after_ms = sensor_elapsed, "sensing recovered from error");
                }
            }
            SensorState::WarmingUp if sensor_elapsed > t.sensor_warmup_timeout_ms => {
                let _ = self.transition_sensor(SensorState::Error, now_ms);
                tracing::error!(elapsed_ms = sensor_elapsed, "sensing stuck warming up");
                faults.push(CoreError::Timeout);
            }
            _ => {}
        }

        faults
    }

    /// While the device is in Maintenance, move every active pump to
    /// Maintenance. Returns each pump moved and how long it had been Dosing
    /// (zero for any other phase).
    pub fn hold_for_maintenance(&mut self, now_ms: u64) -> Vec<(PumpId, u64)> {
        let mut held = Vec::new();
        if self.device() != DeviceState::Maintenance {
            return held;
        }
        for id in PumpId::ALL {
            let s = self.pump(id);
            if s == PumpState::Idle || s == PumpState::Maintenance {
                continue;
            }
            let dosing_ms = if s == PumpState::Dosing {
                self.pumps[id.index()].elapsed(now_ms)
            } else {
                0
            };
            if self
                .transition_pump(id, PumpState::Maintenance, now_ms)
                .is_ok()
            {
                held.push((id, dosing_ms));
            }
        }
        held
    }

    /// True once per status interval. Restarts the interval when it fires.
    pub fn status_due(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_status_ms) >= self.timeouts.status_interval_ms {
            self.last_status_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Device to Error, every pump straight to Idle, sensing to Ready.
    ///
    /// No legality check applies. Pumps skip the cool-down lockout.
    pub fn emergency_stop(&mut self, now_ms: u64) {
        let prev = self.device.force(DeviceState::Error, now_ms);
        for id in PumpId::ALL {
            let was = self.pumps[id.index()].force(PumpState::Idle, now_ms);
            if was != PumpState::Idle {
                tracing::warn!(pump = %id, from = was.label(), "pump forced idle by emergency stop");
            }
        }
        self.sensor.force(SensorState::Ready, now_ms);
        tracing::error!(from = prev.label(), "EMERGENCY STOP");
    }
}
