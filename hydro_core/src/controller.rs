//! The owned controller aggregate: State Manager, Dosing Engine, Pump
//! Sequencer, actuator and clock behind one exclusively-owned handle.
//!
//! Every entry point reads the clock once and runs to completion; nothing
//! here blocks or spawns.

use std::sync::Arc;

use hydro_traits::{Actuator, Clock, Measurement};

use crate::config::ControllerCfg;
use crate::engine::{DoseDecision, DosePlan, DosingEngine};
use crate::error::{CoreError, TransitionRejected};
use crate::pid::Gains;
use crate::pump::PumpId;
use crate::sequencer::PumpSequencer;
use crate::state_manager::{MachineId, StateManager};
use crate::states::{CalibrationState, DeviceState, PumpState, SensorState};
use crate::status::{PumpStatus, StatusSnapshot};

/// What happened during one `tick`.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub now_ms: u64,
    /// Outcome of the feedback evaluation, if one ran this iteration.
    pub decision: Option<DoseDecision>,
    /// Timeouts and hardware faults raised this iteration.
    pub faults: Vec<CoreError>,
    pub device: DeviceState,
}

pub struct Controller<A: Actuator> {
    state: StateManager,
    engine: DosingEngine,
    sequencer: PumpSequencer,
    actuator: A,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: ControllerCfg,
    invalid_streak: u32,
}

impl<A: Actuator> core::fmt::Debug for Controller<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("device", &self.state.device())
            .field("auto", &self.engine.is_auto_enabled())
            .field("target_ph", &self.engine.target())
            .field("invalid_streak", &self.invalid_streak)
            .finish()
    }
}

impl<A: Actuator> Controller<A> {
    pub(crate) fn from_parts(
        actuator: A,
        cfg: ControllerCfg,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            state: StateManager::new(cfg.timeouts, cfg.safety.max_run_ms, now),
            engine: DosingEngine::new(&cfg, now),
            sequencer: PumpSequencer::new(&cfg.sequencer),
            actuator,
            clock,
            cfg,
            invalid_streak: 0,
        }
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn engine(&self) -> &DosingEngine {
        &self.engine
    }

    pub fn cfg(&self) -> &ControllerCfg {
        &self.cfg
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    pub fn invalid_streak(&self) -> u32 {
        self.invalid_streak
    }

    /// Walk the device from Startup (or Shutdown) to Monitoring and bring
    /// sensing to Ready. All outputs are written to zero.
    pub fn boot(&mut self) -> Result<(), TransitionRejected> {
        let now = self.now_ms();
        if self.state.device() == DeviceState::Shutdown {
            self.state.transition_device(DeviceState::Startup, now)?;
        }
        self.state
            .transition_device(DeviceState::Initializing, now)?;
        for e in self.sequencer.all_off(&mut self.engine, &mut self.actuator) {
            tracing::warn!(error = %e, "output reset failed during boot");
        }
        match self.state.sensor() {
            SensorState::Ready => {}
            SensorState::Initializing | SensorState::Error => {
                self.state.transition_sensor(SensorState::Ready, now)?;
            }
            _ => {
                self.state.transition_sensor(SensorState::Error, now)?;
                self.state.transition_sensor(SensorState::Ready, now)?;
            }
        }
        self.state.transition_device(DeviceState::Monitoring, now)?;
        tracing::info!(
            target_ph = self.engine.target(),
            auto = self.engine.is_auto_enabled(),
            "controller ready"
        );
        Ok(())
    }

    /// Stop every pump and park the device in Shutdown.
    pub fn shutdown(&mut self) {
        self.stop_all();
        let now = self.now_ms();
        let _ = self.state.transition_device(DeviceState::Shutdown, now);
        tracing::info!("controller shut down");
    }

    /// One control iteration: timeout sweep, pump safety sweep, periodic
    /// status, measurement handling and dosing decision, then sequencing.
    pub fn tick(&mut self, measurement: Option<&Measurement>) -> TickReport {
        let now = self.now_ms();

        for (pump, dosing_ms) in self.state.hold_for_maintenance(now) {
            self.engine.finish_run(pump, dosing_ms);
        }
        let mut faults = self.state.sweep_timeouts(now);
        for f in &faults {
            if let CoreError::HardTimeout {
                pump,
                phase: PumpState::Dosing,
                elapsed_ms,
            } = f
            {
                self.engine.finish_run(*pump, *elapsed_ms);
            }
        }
        faults.extend(self.engine.safety_sweep(&mut self.state, now));

        if self.state.status_due(now) && self.state.is_verbose() {
            let snapshot = self.snapshot_at(now);
            for line in snapshot.to_string().lines() {
                tracing::info!(target: "hydro::status", "{line}");
            }
        }

        let decision = measurement.and_then(|m| self.handle_measurement(m, now, &mut faults));

        faults.extend(
            self.sequencer
                .step(&mut self.state, &mut self.engine, &mut self.actuator, now),
        );

        TickReport {
            now_ms: now,
            decision,
            faults,
            device: self.state.device(),
        }
    }

    fn handle_measurement(
        &mut self,
        m: &Measurement,
        now: u64,
        faults: &mut Vec<CoreError>,
    ) -> Option<DoseDecision> {
        if !self.state.device().accepts_doses() {
            return None;
        }
        if !m.valid {
            self.invalid_streak = self.invalid_streak.saturating_add(1);
            tracing::warn!(streak = self.invalid_streak, "invalid measurement");
            if self.invalid_streak > self.cfg.max_invalid_readings {
                self.invalid_streak = 0;
                if self
                    .state
                    .transition_device(DeviceState::Error, now)
                    .is_ok()
                {
                    tracing::error!("too many invalid readings; device to error");
                    faults.push(CoreError::DeviceFault(
                        "too many consecutive invalid readings".into(),
                    ));
                }
            }
            return None;
        }
        self.invalid_streak = 0;

        if !self.engine.is_auto_enabled() {
            return None;
        }
        if self
            .state
            .transition_device(DeviceState::Dosing, now)
            .is_err()
        {
            return None;
        }
        let decision =
            match self
                .engine
                .compute_dose(&mut self.state, m.ph, m.volume_liters, now)
            {
                Ok(d) => d,
                Err(e @ CoreError::InvalidMeasurement { .. }) => DoseDecision::Rejected(e),
                Err(e) => {
                    faults.push(e.clone());
                    DoseDecision::Rejected(e)
                }
            };
        let _ = self.state.transition_device(DeviceState::Monitoring, now);
        Some(decision)
    }

    // ── Operator commands ────────────────────────────────────────────────────

    pub fn set_target(&mut self, ph: f32) -> f32 {
        self.engine.set_target(ph)
    }

    pub fn target(&self) -> f32 {
        self.engine.target()
    }

    pub fn enable_auto(&mut self, enabled: bool) {
        self.engine.enable_auto(enabled);
    }

    pub fn is_auto_enabled(&self) -> bool {
        self.engine.is_auto_enabled()
    }

    pub fn set_pid(&mut self, kp: f32, ki: f32, kd: f32) -> Gains {
        self.engine.set_pid(kp, ki, kd)
    }

    pub fn pid(&self) -> Gains {
        self.engine.gains()
    }

    pub fn can_dose(&mut self, pump: PumpId) -> bool {
        let now = self.now_ms();
        self.engine.can_dose(&self.state, pump, now)
    }

    pub fn manual_dose(&mut self, pump: PumpId, ml: f32) -> Result<DosePlan, CoreError> {
        let now = self.now_ms();
        self.engine.manual_dose(&mut self.state, pump, ml, now)
    }

    pub fn start_manual(&mut self, pump: PumpId, rate_ml_min: f32) -> Result<DosePlan, CoreError> {
        let now = self.now_ms();
        self.engine
            .start_manual(&mut self.state, pump, rate_ml_min, now)
    }

    /// Stop one pump and zero its output immediately.
    pub fn stop_manual(&mut self, pump: PumpId) -> Result<PumpState, CoreError> {
        let now = self.now_ms();
        let end = self.engine.stop_manual(&mut self.state, pump, now)?;
        if let Err(e) = self
            .sequencer
            .off(self.engine.record_mut(pump), &mut self.actuator)
        {
            tracing::warn!(pump = %pump, error = %e, "failed to zero output on stop");
        }
        Ok(end)
    }

    /// Every pump to Idle with its output zeroed.
    pub fn stop_all(&mut self) {
        let now = self.now_ms();
        self.engine.stop_all(&mut self.state, now);
        for e in self.sequencer.all_off(&mut self.engine, &mut self.actuator) {
            tracing::warn!(error = %e, "failed to zero output on stop-all");
        }
    }

    /// Unconditional stop: device to Error, every pump to Idle (skipping
    /// cool-down), sensing to Ready, every output to zero.
    pub fn emergency_stop(&mut self) {
        let now = self.now_ms();
        for id in PumpId::ALL {
            let elapsed = if self.state.pump(id) == PumpState::Dosing {
                self.state.duration_in_state(MachineId::Pump(id), now)
            } else {
                0
            };
            self.engine.finish_run(id, elapsed);
        }
        self.state.emergency_stop(now);
        self.invalid_streak = 0;
        for e in self.sequencer.all_off(&mut self.engine, &mut self.actuator) {
            tracing::warn!(error = %e, "failed to zero output on emergency stop");
        }
    }

    /// Operator release of a device Error. Returns false if the device was not in Error.
    pub fn recover_from_error(&mut self) -> bool {
        if self.state.device() != DeviceState::Error {
            return false;
        }
        let now = self.now_ms();
        self.state
            .transition_device(DeviceState::Monitoring, now)
            .is_ok()
    }

    /// Enter or leave maintenance. Leaving releases held pumps to Idle.
    pub fn set_maintenance(&mut self, on: bool) -> bool {
        let now = self.now_ms();
        if on {
            return self
                .state
                .transition_device(DeviceState::Maintenance, now)
                .is_ok();
        }
        if self.state.device() != DeviceState::Maintenance {
            return false;
        }
        for id in PumpId::ALL {
            if self.state.pump(id) == PumpState::Maintenance {
                let _ = self.state.transition_pump(id, PumpState::Idle, now);
            }
        }
        self.state
            .transition_device(DeviceState::Monitoring, now)
            .is_ok()
    }

    /// Device to Calibrating with the calibration machine Active.
    pub fn begin_calibration(&mut self) -> Result<(), TransitionRejected> {
        let now = self.now_ms();
        self.state
            .transition_device(DeviceState::Calibrating, now)?;
        if let Err(e) = self
            .state
            .transition_calibration(CalibrationState::Active, now)
        {
            let _ = self.state.transition_device(DeviceState::Monitoring, now);
            return Err(e);
        }
        Ok(())
    }

    /// Calibration back to Idle and the device back to Monitoring.
    pub fn end_calibration(&mut self) -> Result<(), TransitionRejected> {
        let now = self.now_ms();
        self.state
            .transition_calibration(CalibrationState::Idle, now)?;
        self.state.transition_device(DeviceState::Monitoring, now)?;
        Ok(())
    }

    /// Sensing transitions, driven by the host loop around probe reads.
    pub fn transition_sensor(&mut self, to: SensorState) -> Result<SensorState, TransitionRejected> {
        let now = self.now_ms();
        self.state.transition_sensor(to, now)
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.state.set_verbose(verbose);
    }

    pub fn reset_counters(&mut self) {
        let now = self.now_ms();
        self.engine.reset_counters(now);
    }

    pub fn total_dosed(&self, pump: PumpId) -> f32 {
        self.engine.total_dosed(pump)
    }

    pub fn is_running(&self, pump: PumpId) -> bool {
        self.engine.is_running(pump)
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        self.snapshot_at(self.now_ms())
    }

    fn snapshot_at(&self, now: u64) -> StatusSnapshot {
        let safety = self.engine.safety();
        let pumps = PumpId::ALL
            .into_iter()
            .map(|id| {
                let rec = self.engine.record(id);
                let state = self.state.pump(id);
                let in_state_ms = self.state.duration_in_state(MachineId::Pump(id), now);
                let window = match state {
                    PumpState::Priming => Some(self.cfg.sequencer.priming_ms),
                    PumpState::Dosing => Some(rec.run_duration_ms),
                    PumpState::CoolingDown => Some(self.cfg.timeouts.cooldown_ms),
                    PumpState::Error => Some(safety.pump_error_recovery_ms),
                    PumpState::Idle | PumpState::Maintenance => None,
                };
                PumpStatus {
                    pump: id,
                    state,
                    in_state_ms,
                    running: rec.running,
                    duty: rec.output_duty.unwrap_or(0),
                    remaining_ms: window.map(|w| w.saturating_sub(in_state_ms)),
                    doses_this_hour: rec.controller.doses_this_hour,
                    max_doses_per_hour: safety.max_doses_per_hour,
                    next_dose_in_ms: rec
                        .controller
                        .interval_remaining(now, safety.min_dose_interval_ms),
                    total_dosed_ml: rec.controller.total_dosed_ml,
                }
            })
            .collect();
        StatusSnapshot {
            now_ms: now,
            device: self.state.device(),
            device_ms: self.state.duration_in_state(MachineId::Device, now),
            sensor: self.state.sensor(),
            sensor_ms: self.state.duration_in_state(MachineId::Sensor, now),
            calibration: self.state.calibration(),
            auto_enabled: self.engine.is_auto_enabled(),
            target_ph: self.engine.target(),
            gains: self.engine.gains(),
            pumps,
        }
    }
}
