//! Host loop: paces iterations, walks the sensing machine around probe
//! reads and feeds measurements into `Controller::tick`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use hydro_traits::{Actuator, Measurement, Probe};

use crate::controller::{Controller, TickReport};
use crate::engine::DoseDecision;
use crate::error::{CoreError, Result as CoreResult};
use crate::hw_error::map_hw_error;
use crate::states::{DeviceState, SensorState};
use crate::status::StatusSnapshot;

/// Host loop pacing.
#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub loop_period_ms: u64,
    pub sample_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Stop after this long; `None` runs until shutdown is requested.
    pub duration_ms: Option<u64>,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            loop_period_ms: 100,
            sample_interval_ms: 5_000,
            probe_timeout_ms: 1_000,
            duration_ms: None,
        }
    }
}

impl From<&hydro_config::RunnerCfg> for RunParams {
    fn from(c: &hydro_config::RunnerCfg) -> Self {
        Self {
            loop_period_ms: c.loop_period_ms,
            sample_interval_ms: c.sample_interval_ms,
            probe_timeout_ms: c.probe_timeout_ms,
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub iterations: u64,
    pub readings: u64,
    pub probe_failures: u64,
    pub doses_started: u32,
    pub dosed_ml: f32,
    pub blocked: u32,
    pub below_minimum: u32,
    pub rejected: u32,
    pub faults: u32,
    pub final_status: StatusSnapshot,
}

#[derive(Default)]
struct Tally {
    iterations: u64,
    readings: u64,
    probe_failures: u64,
    doses_started: u32,
    dosed_ml: f32,
    blocked: u32,
    below_minimum: u32,
    rejected: u32,
    faults: u32,
}

impl Tally {
    fn absorb(&mut self, report: &TickReport) {
        self.iterations += 1;
        self.faults = self
            .faults
            .saturating_add(u32::try_from(report.faults.len()).unwrap_or(u32::MAX));
        match &report.decision {
            Some(DoseDecision::Started(plan)) => {
                self.doses_started += 1;
                self.dosed_ml += plan.volume_ml;
            }
            Some(DoseDecision::Blocked { .. }) => self.blocked += 1,
            Some(DoseDecision::BelowMinimum { .. }) => self.below_minimum += 1,
            Some(DoseDecision::Rejected(_)) => self.rejected += 1,
            None => {}
        }
    }
}

/// Take one reading, walking sensing Ready -> WarmingUp -> Reading -> Filtering -> Ready.
///
/// A failed read sends sensing to Error; the timeout sweep recovers it.
fn sample<A: Actuator, P: Probe + ?Sized>(
    ctrl: &mut Controller<A>,
    probe: &mut P,
    timeout: Duration,
    tally: &mut Tally,
) -> Option<Measurement> {
    if ctrl.state().sensor() != SensorState::Ready {
        return None;
    }
    ctrl.transition_sensor(SensorState::WarmingUp).ok()?;
    match probe.read(timeout) {
        Ok(m) => {
            for s in [SensorState::Reading, SensorState::Filtering, SensorState::Ready] {
                let _ = ctrl.transition_sensor(s);
            }
            tally.readings += 1;
            tracing::debug!(
                ph = m.ph,
                volume_liters = m.volume_liters,
                conductivity = m.conductivity,
                valid = m.valid,
                "measurement"
            );
            Some(m)
        }
        Err(e) => {
            let err = map_hw_error(&*e);
            tracing::warn!(error = %err, "probe read failed");
            let _ = ctrl.transition_sensor(SensorState::Error);
            tally.probe_failures += 1;
            None
        }
    }
}

/// Run the host loop until `params.duration_ms` elapses or `shutdown` is set.
/// All pumps are stopped on exit.
pub fn run<A, P>(
    ctrl: &mut Controller<A>,
    probe: &mut P,
    params: &RunParams,
    shutdown: &AtomicBool,
) -> CoreResult<RunSummary>
where
    A: Actuator,
    P: Probe + ?Sized,
{
    if ctrl.state().device() == DeviceState::Startup {
        ctrl.boot()
            .map_err(|e| eyre::Report::new(CoreError::from(e)))
            .wrap_err("boot")?;
    }

    let clock = Arc::clone(ctrl.clock());
    let start = clock.now_ms();
    let period = Duration::from_millis(params.loop_period_ms.max(1));
    let timeout = Duration::from_millis(params.probe_timeout_ms.max(1));
    let mut next_sample = start;
    let mut tally = Tally::default();

    tracing::info!(
        loop_period_ms = params.loop_period_ms,
        sample_interval_ms = params.sample_interval_ms,
        duration_ms = params.duration_ms,
        auto = ctrl.is_auto_enabled(),
        "run start"
    );

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested");
            break;
        }
        let now = clock.now_ms();
        if let Some(limit) = params.duration_ms
            && now.saturating_sub(start) >= limit
        {
            break;
        }

        let measurement = if now >= next_sample {
            next_sample = now.saturating_add(params.sample_interval_ms);
            sample(ctrl, probe, timeout, &mut tally)
        } else {
            None
        };

        let report = ctrl.tick(measurement.as_ref());
        tally.absorb(&report);
        clock.sleep(period);
    }

    ctrl.stop_all();
    let final_status = ctrl.status_snapshot();
    tracing::info!(
        iterations = tally.iterations,
        readings = tally.readings,
        doses = tally.doses_started,
        dosed_ml = tally.dosed_ml,
        faults = tally.faults,
        "run finished"
    );

    Ok(RunSummary {
        iterations: tally.iterations,
        readings: tally.readings,
        probe_failures: tally.probe_failures,
        doses_started: tally.doses_started,
        dosed_ml: tally.dosed_ml,
        blocked: tally.blocked,
        below_minimum: tally.below_minimum,
        rejected: tally.rejected,
        faults: tally.faults,
        final_status,
    })
}
