//! Pump Sequencer: turns pump states into actuator output.
//!
//! Called every iteration for every pump. All timing is a comparison of the
//! pump's time-in-state against fixed windows; nothing here blocks.

use hydro_traits::Actuator;

use crate::config::{FlowCfg, SequencerCfg};
use crate::engine::DosingEngine;
use crate::error::CoreError;
use crate::hw_error::map_hw_error;
use crate::pump::{PumpId, PumpRecord};
use crate::state_manager::{MachineId, StateManager};
use crate::states::PumpState;

/// Map a percentage to the 8-bit duty range, truncating.
#[inline]
pub fn duty_from_pct(pct: f32) -> u8 {
    let pct = if pct.is_finite() {
        f64::from(pct).clamp(0.0, 100.0)
    } else {
        0.0
    };
    (pct * 255.0 / 100.0) as u8
}

/// Map a delivery rate to a duty value.
///
/// The rate is clamped to the pump's flow range, then interpolated linearly
/// from `min_duty_pct` at the slowest rate to 100% at the fastest.
pub fn duty_for_rate(rate_ml_min: f32, flow: &FlowCfg) -> u8 {
    let lo = f64::from(flow.min_rate_ml_min);
    let hi = f64::from(flow.max_rate_ml_min);
    let rate = if rate_ml_min.is_finite() {
        f64::from(rate_ml_min).clamp(lo, hi)
    } else {
        lo
    };
    let span = hi - lo;
    let frac = if span > 0.0 { (rate - lo) / span } else { 1.0 };
    let min_pct = f64::from(flow.min_duty_pct);
    let pct = min_pct + frac * (100.0 - min_pct);
    (pct.clamp(0.0, 100.0) * 255.0 / 100.0) as u8
}

#[derive(Debug, Clone)]
pub struct PumpSequencer {
    priming_ms: u64,
    priming_duty: u8,
}

impl PumpSequencer {
    pub fn new(cfg: &SequencerCfg) -> Self {
        Self {
            priming_ms: cfg.priming_ms,
            priming_duty: duty_from_pct(cfg.priming_duty_pct),
        }
    }

    pub fn priming_duty(&self) -> u8 {
        self.priming_duty
    }

    /// Advance every pump by one iteration. Returns actuator faults; a failed
    /// write is retried on the next iteration.
    pub fn step<A: Actuator + ?Sized>(
        &self,
        sm: &mut StateManager,
        engine: &mut DosingEngine,
        actuator: &mut A,
        now_ms: u64,
    ) -> Vec<CoreError> {
        let mut faults = Vec::new();
        for id in PumpId::ALL {
            let duty = self.desired_duty(sm, engine, id, now_ms);
            if let Err(e) = drive(engine.record_mut(id), actuator, duty) {
                faults.push(e);
            }
        }
        faults
    }

    fn desired_duty(
        &self,
        sm: &mut StateManager,
        engine: &mut DosingEngine,
        id: PumpId,
        now_ms: u64,
    ) -> u8 {
        let elapsed = sm.duration_in_state(MachineId::Pump(id), now_ms);
        match sm.pump(id) {
            PumpState::Priming if elapsed < self.priming_ms => self.priming_duty,
            PumpState::Priming => match sm.transition_pump(id, PumpState::Dosing, now_ms) {
                Ok(_) => engine.record(id).target_duty,
                Err(_) => 0,
            },
            PumpState::Dosing => {
                let rec = engine.record(id);
                if elapsed < rec.run_duration_ms {
                    return rec.target_duty;
                }
                engine.finish_run(id, elapsed);
                if sm
                    .transition_pump(id, PumpState::CoolingDown, now_ms)
                    .is_ok()
                {
                    tracing::info!(pump = %id, dosed_ms = elapsed, "dose complete; cooling down");
                }
                0
            }
            PumpState::Idle
            | PumpState::CoolingDown
            | PumpState::Error
            | PumpState::Maintenance => {
                engine.record_mut(id).running = false;
                0
            }
        }
    }

    /// Write zero to every channel regardless of what was last written.
    pub fn all_off<A: Actuator + ?Sized>(
        &self,
        engine: &mut DosingEngine,
        actuator: &mut A,
    ) -> Vec<CoreError> {
        let mut faults = Vec::new();
        for id in PumpId::ALL {
            let rec = engine.record_mut(id);
            rec.output_duty = None;
            rec.running = false;
            if let Err(e) = drive(rec, actuator, 0) {
                faults.push(e);
            }
        }
        faults
    }

    /// Write zero to one pump's channel regardless of what was last written.
    pub fn off<A: Actuator + ?Sized>(
        &self,
        rec: &mut PumpRecord,
        actuator: &mut A,
    ) -> Result<(), CoreError> {
        rec.output_duty = None;
        drive(rec, actuator, 0)
    }
}

/// Write `duty` unless it is already applied.
fn drive<A: Actuator + ?Sized>(
    rec: &mut PumpRecord,
    actuator: &mut A,
    duty: u8,
) -> Result<(), CoreError> {
    if rec.output_duty == Some(duty) {
        return Ok(());
    }
    match actuator.set_duty(rec.channel, duty) {
        Ok(()) => {
            tracing::trace!(pump = %rec.id, channel = rec.channel, duty, "duty applied");
            rec.output_duty = Some(duty);
            Ok(())
        }
        Err(e) => {
            let err = map_hw_error(&*e);
            tracing::warn!(
                pump = %rec.id,
                channel = rec.channel,
                duty,
                error = %err,
                "actuator write failed; retrying next iteration"
            );
            rec.output_duty = None;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duty_mapping_reference_points() {
        let flow = FlowCfg::default();
        assert_eq!(duty_for_rate(5.2, &flow), 25);
        assert_eq!(duty_for_rate(30.0, &flow), 92);
        assert_eq!(duty_for_rate(90.0, &flow), 255);
    }

    #[test]
    fn duty_mapping_clamps_out_of_range_rates() {
        let flow = FlowCfg::default();
        assert_eq!(duty_for_rate(0.5, &flow), duty_for_rate(5.2, &flow));
        assert_eq!(duty_for_rate(500.0, &flow), 255);
        assert_eq!(duty_for_rate(f32::NAN, &flow), 25);
    }

    #[test]
    fn priming_duty_is_quarter_scale() {
        assert_eq!(duty_from_pct(25.0), 63);
        assert_eq!(duty_from_pct(0.0), 0);
        assert_eq!(duty_from_pct(150.0), 255);
    }
}
