//! Dosing Engine: feedback dose computation and the per-pump safety gates.
//!
//! The engine never touches the actuator. It decides whether a pump may run,
//! for how long and at what duty, then asks the `StateManager` for the
//! Priming transition; the `PumpSequencer` does the rest.

use crate::config::{ControllerCfg, FlowCfg, Limits, SafetyCfg};
use crate::error::{CoreError, GateBlock};
use crate::pid::{DoseController, Gains};
use crate::pump::{PumpId, PumpRecord};
use crate::sequencer::duty_for_rate;
use crate::state_manager::{MachineId, StateManager};
use crate::states::PumpState;
use crate::util::{delivered_ml, run_duration_ms};

/// Reservoir volume the feedback output is scaled against.
pub const REFERENCE_VOLUME_L: f32 = 10.0;
/// Operator set-point range.
pub const SETPOINT_RANGE: (f32, f32) = (5.0, 8.0);

/// A dose the engine accepted and handed to the sequencer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DosePlan {
    pub pump: PumpId,
    /// Planned volume; zero for open-ended manual runs.
    pub volume_ml: f32,
    pub rate_ml_min: f32,
    pub duty: u8,
    pub run_ms: u64,
    pub manual: bool,
}

/// Outcome of one feedback evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum DoseDecision {
    Started(DosePlan),
    /// A gate held the dose back; normal operation.
    Blocked { pump: PumpId, reason: GateBlock },
    /// The correction needed is smaller than the minimum dose.
    BelowMinimum { pump: PumpId, volume_ml: f32 },
    /// The measurement or the feedback output was unusable; nothing was done.
    Rejected(CoreError),
}

#[derive(Debug, Clone)]
pub struct DosingEngine {
    pumps: [PumpRecord; 4],
    auto: bool,
    setpoint: f32,
    gains: Gains,
    safety: SafetyCfg,
    flow: FlowCfg,
    limits: Limits,
}

impl DosingEngine {
    pub fn new(cfg: &ControllerCfg, now_ms: u64) -> Self {
        let gains = cfg.pid.gains.or_previous(Gains::default()).clamped();
        let setpoint = cfg.pid.setpoint_ph.clamp(SETPOINT_RANGE.0, SETPOINT_RANGE.1);
        let pumps = PumpId::ALL.map(|id| {
            PumpRecord::new(
                id,
                cfg.channel(id),
                DoseController::new(gains, setpoint, cfg.pid.integral_limit, now_ms),
            )
        });
        Self {
            pumps,
            auto: false,
            setpoint,
            gains,
            safety: cfg.safety,
            flow: cfg.flow,
            limits: cfg.limits,
        }
    }

    pub fn record(&self, id: PumpId) -> &PumpRecord {
        &self.pumps[id.index()]
    }

    pub(crate) fn record_mut(&mut self, id: PumpId) -> &mut PumpRecord {
        &mut self.pumps[id.index()]
    }

    pub fn is_auto_enabled(&self) -> bool {
        self.auto
    }

    /// Toggle automatic feedback dosing. Enabling clears stale windup.
    pub fn enable_auto(&mut self, enabled: bool) {
        if enabled {
            self.reset_pid_state();
        }
        self.auto = enabled;
        tracing::info!(enabled, "automatic dosing");
    }

    pub fn target(&self) -> f32 {
        self.setpoint
    }

    /// Set the pH set-point, clamped to the operator range. Returns the value applied.
    pub fn set_target(&mut self, ph: f32) -> f32 {
        let ph = if ph.is_finite() {
            ph.clamp(SETPOINT_RANGE.0, SETPOINT_RANGE.1)
        } else {
            self.setpoint
        };
        self.setpoint = ph;
        for rec in &mut self.pumps {
            rec.controller.setpoint = ph;
        }
        self.reset_pid_state();
        tracing::info!(target_ph = ph, "set-point changed");
        ph
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    /// Retune every pump's gains, clamped to the tuning range. Returns the gains applied.
    pub fn set_pid(&mut self, kp: f32, ki: f32, kd: f32) -> Gains {
        let gains = Gains { kp, ki, kd }.or_previous(self.gains).clamped();
        self.gains = gains;
        for rec in &mut self.pumps {
            rec.controller.gains = gains;
        }
        self.reset_pid_state();
        tracing::info!(kp = gains.kp, ki = gains.ki, kd = gains.kd, "pid gains updated");
        gains
    }

    fn reset_pid_state(&mut self) {
        for rec in &mut self.pumps {
            rec.controller.reset();
        }
    }

    /// Restart every pump's hour window and drop feedback history.
    pub fn reset_counters(&mut self, now_ms: u64) {
        for rec in &mut self.pumps {
            rec.controller.doses_this_hour = 0;
            rec.controller.hour_start_ms = now_ms;
            rec.controller.reset();
        }
        tracing::info!("dose counters reset");
    }

    pub fn total_dosed(&self, id: PumpId) -> f32 {
        self.record(id).controller.total_dosed_ml
    }

    pub fn is_running(&self, id: PumpId) -> bool {
        self.record(id).running
    }

    pub fn safety(&self) -> &SafetyCfg {
        &self.safety
    }

    pub fn flow(&self) -> &FlowCfg {
        &self.flow
    }

    /// Evaluate the gates in order: pump idle, spacing, hourly quota, device mode.
    pub fn check_gates(
        &mut self,
        sm: &StateManager,
        id: PumpId,
        now_ms: u64,
    ) -> Result<(), GateBlock> {
        let safety = self.safety;
        let ctl = &mut self.pumps[id.index()].controller;
        let verdict = evaluate_gates(ctl, sm, id, &safety, now_ms);
        if let Err(reason) = &verdict {
            tracing::debug!(pump = %id, %reason, "dose gated");
        }
        verdict
    }

    pub fn can_dose(&mut self, sm: &StateManager, id: PumpId, now_ms: u64) -> bool {
        self.check_gates(sm, id, now_ms).is_ok()
    }

    /// Range-check a measurement: volume first, then pH.
    pub fn validate(&self, ph: f32, volume_liters: f32) -> Result<(), CoreError> {
        let l = &self.limits;
        if !(volume_liters.is_finite()
            && volume_liters >= l.volume_min_l
            && volume_liters <= l.volume_max_l)
        {
            return Err(CoreError::InvalidMeasurement {
                field: "volume_liters",
                value: volume_liters,
                min: l.volume_min_l,
                max: l.volume_max_l,
            });
        }
        if !(ph.is_finite() && ph >= l.ph_min && ph <= l.ph_max) {
            return Err(CoreError::InvalidMeasurement {
                field: "ph",
                value: ph,
                min: l.ph_min,
                max: l.ph_max,
            });
        }
        Ok(())
    }

    /// pH above the set-point needs the lowering pump, otherwise the raising one.
    pub fn select_pump(&self, ph: f32) -> PumpId {
        if ph > self.setpoint {
            PumpId::PhDown
        } else {
            PumpId::PhUp
        }
    }

    /// Run the feedback law for one measurement and start the resulting dose.
    pub fn compute_dose(
        &mut self,
        sm: &mut StateManager,
        ph: f32,
        volume_liters: f32,
        now_ms: u64,
    ) -> Result<DoseDecision, CoreError> {
        if let Err(e) = self.validate(ph, volume_liters) {
            tracing::warn!(error = %e, "measurement rejected");
            return Err(e);
        }
        let id = self.select_pump(ph);
        if let Err(reason) = self.check_gates(sm, id, now_ms) {
            return Ok(DoseDecision::Blocked { pump: id, reason });
        }

        let terms = self.pumps[id.index()].controller.update(ph);
        let raw_ml = terms.output.abs() * (volume_liters / REFERENCE_VOLUME_L);
        tracing::debug!(
            pump = %id,
            ph,
            error = terms.error,
            integral = terms.integral,
            derivative = terms.derivative,
            output = terms.output,
            dose_ml = raw_ml,
            "pid update"
        );
        if !raw_ml.is_finite() {
            tracing::error!(
                pump = %id,
                output = terms.output,
                "feedback output is not finite; pid state reset"
            );
            self.pumps[id.index()].controller.reset();
            return Err(CoreError::Config(format!(
                "feedback output for {id} is not finite"
            )));
        }
        if raw_ml < self.safety.min_dose_ml {
            return Ok(DoseDecision::BelowMinimum {
                pump: id,
                volume_ml: raw_ml,
            });
        }
        let ml = raw_ml.clamp(self.safety.min_dose_ml, self.safety.max_dose_ml);
        let plan = self.start_dose(sm, id, ml, self.flow.default_rate_ml_min, now_ms)?;
        Ok(DoseDecision::Started(plan))
    }

    fn clamp_rate(&self, rate_ml_min: f32) -> f32 {
        if rate_ml_min.is_finite() {
            rate_ml_min.clamp(self.flow.min_rate_ml_min, self.flow.max_rate_ml_min)
        } else {
            self.flow.default_rate_ml_min
        }
    }

    /// Accept a dose of `volume_ml` at `rate_ml_min`: gates, Priming
    /// transition, then acceptance bookkeeping.
    pub fn start_dose(
        &mut self,
        sm: &mut StateManager,
        id: PumpId,
        volume_ml: f32,
        rate_ml_min: f32,
        now_ms: u64,
    ) -> Result<DosePlan, CoreError> {
        self.check_gates(sm, id, now_ms)?;
        let rate = self.clamp_rate(rate_ml_min);
        let plan = DosePlan {
            pump: id,
            volume_ml,
            rate_ml_min: rate,
            duty: duty_for_rate(rate, &self.flow),
            run_ms: run_duration_ms(volume_ml, rate, self.safety.max_run_ms),
            manual: false,
        };
        self.begin_run(sm, &plan, now_ms)?;
        tracing::info!(
            pump = %id,
            dose_ml = volume_ml,
            rate_ml_min = rate,
            duty = plan.duty,
            run_ms = plan.run_ms,
            "dose started"
        );
        Ok(plan)
    }

    /// Operator-specified volume, clamped to the dose limits, at the default rate.
    pub fn manual_dose(
        &mut self,
        sm: &mut StateManager,
        id: PumpId,
        ml: f32,
        now_ms: u64,
    ) -> Result<DosePlan, CoreError> {
        let ml = if ml.is_finite() {
            ml.clamp(self.safety.min_dose_ml, self.safety.max_dose_ml)
        } else {
            self.safety.min_dose_ml
        };
        self.start_dose(sm, id, ml, self.flow.default_rate_ml_min, now_ms)
    }

    /// Open-ended run at an operator rate. Runs until stopped or the run ceiling.
    pub fn start_manual(
        &mut self,
        sm: &mut StateManager,
        id: PumpId,
        rate_ml_min: f32,
        now_ms: u64,
    ) -> Result<DosePlan, CoreError> {
        self.check_gates(sm, id, now_ms)?;
        let rate = self.clamp_rate(rate_ml_min);
        let plan = DosePlan {
            pump: id,
            volume_ml: 0.0,
            rate_ml_min: rate,
            duty: duty_for_rate(rate, &self.flow),
            run_ms: self.safety.max_run_ms,
            manual: true,
        };
        self.begin_run(sm, &plan, now_ms)?;
        tracing::info!(
            pump = %id,
            rate_ml_min = rate,
            duty = plan.duty,
            "manual run started"
        );
        Ok(plan)
    }

    fn begin_run(
        &mut self,
        sm: &mut StateManager,
        plan: &DosePlan,
        now_ms: u64,
    ) -> Result<(), CoreError> {
        sm.transition_pump(plan.pump, PumpState::Priming, now_ms)?;
        let rec = &mut self.pumps[plan.pump.index()];
        rec.target_duty = plan.duty;
        rec.run_duration_ms = plan.run_ms;
        rec.running = true;
        rec.manual_rate_ml_min = plan.manual.then_some(plan.rate_ml_min);
        rec.controller.record_dose(now_ms, plan.volume_ml);
        Ok(())
    }

    /// Close out a run: manual runs add what they delivered to the lifetime total.
    pub fn finish_run(&mut self, id: PumpId, dosing_elapsed_ms: u64) {
        let rec = &mut self.pumps[id.index()];
        if let Some(rate) = rec.manual_rate_ml_min.take() {
            let ml = delivered_ml(rate, dosing_elapsed_ms);
            rec.controller.total_dosed_ml += ml;
            tracing::info!(pump = %id, delivered_ml = ml, "manual run finished");
        }
        rec.running = false;
    }

    /// Stop one pump. Dosing goes through the cool-down lockout; any other
    /// active state is released to Idle. Returns the state the pump ended in.
    pub fn stop_manual(
        &mut self,
        sm: &mut StateManager,
        id: PumpId,
        now_ms: u64,
    ) -> Result<PumpState, CoreError> {
        let state = sm.pump(id);
        let end = match state {
            PumpState::Idle => {
                self.finish_run(id, 0);
                return Ok(PumpState::Idle);
            }
            PumpState::Dosing => {
                let elapsed = sm.duration_in_state(MachineId::Pump(id), now_ms);
                self.finish_run(id, elapsed);
                PumpState::CoolingDown
            }
            _ => {
                self.finish_run(id, 0);
                PumpState::Idle
            }
        };
        sm.transition_pump(id, end, now_ms)?;
        tracing::info!(pump = %id, from = %state, to = %end, "pump stopped");
        Ok(end)
    }

    /// Force every pump to Idle through the escape edge.
    pub fn stop_all(&mut self, sm: &mut StateManager, now_ms: u64) {
        for id in PumpId::ALL {
            let state = sm.pump(id);
            let elapsed = if state == PumpState::Dosing {
                sm.duration_in_state(MachineId::Pump(id), now_ms)
            } else {
                0
            };
            self.finish_run(id, elapsed);
            if state != PumpState::Idle {
                let _ = sm.transition_pump(id, PumpState::Idle, now_ms);
            }
        }
        tracing::info!("all pumps stopped");
    }

    /// Per-pump timeouts: priming stall and run ceiling go to Error, Error
    /// recovers to Idle once the recovery window has passed.
    pub fn safety_sweep(&mut self, sm: &mut StateManager, now_ms: u64) -> Vec<CoreError> {
        let mut faults = Vec::new();
        let s = self.safety;
        for id in PumpId::ALL {
            let elapsed = sm.duration_in_state(MachineId::Pump(id), now_ms);
            let phase = sm.pump(id);
            let limit = match phase {
                PumpState::Priming => s.priming_timeout_ms,
                PumpState::Dosing => s.max_run_ms,
                PumpState::Error => {
                    if elapsed > s.pump_error_recovery_ms
                        && sm.transition_pump(id, PumpState::Idle, now_ms).is_ok()
                    {
                        tracing::info!(pump = %id, after_ms = elapsed, "pump recovered from error");
                    }
                    continue;
                }
                _ => continue,
            };
            if elapsed <= limit {
                continue;
            }
            self.finish_run(id, if phase == PumpState::Dosing { elapsed } else { 0 });
            let _ = sm.transition_pump(id, PumpState::Error, now_ms);
            tracing::error!(
                pump = %id,
                phase = %phase,
                elapsed_ms = elapsed,
                limit_ms = limit,
                "pump timed out; forced to error"
            );
            faults.push(CoreError::HardTimeout {
                pump: id,
                phase,
                elapsed_ms: elapsed,
            });
        }
        faults
    }
}

fn evaluate_gates(
    ctl: &mut DoseController,
    sm: &StateManager,
    id: PumpId,
    safety: &SafetyCfg,
    now_ms: u64,
) -> Result<(), GateBlock> {
    let state = sm.pump(id);
    if state != PumpState::Idle {
        return Err(GateBlock::PumpBusy(state));
    }
    let remaining_ms = ctl.interval_remaining(now_ms, safety.min_dose_interval_ms);
    if remaining_ms > 0 {
        return Err(GateBlock::IntervalNotElapsed { remaining_ms });
    }
    ctl.roll_hour_window(now_ms, safety.hour_window_ms);
    if ctl.doses_this_hour >= safety.max_doses_per_hour {
        return Err(GateBlock::HourlyQuotaReached {
            doses: ctl.doses_this_hour,
        });
    }
    let device = sm.device();
    if !device.accepts_doses() {
        return Err(GateBlock::DeviceMode(device));
    }
    Ok(())
}
