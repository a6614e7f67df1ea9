//! Hardware assembly and command execution: config mapping, actuator and
//! probe selection, controller construction, and the run/dose commands.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use hydro_config::Config;
use hydro_core::conversions::measurement_from_row;
use hydro_core::{
    Controller, ControllerCfg, CoreError, DosePlan, PumpId, PumpState, RunParams, RunSummary,
};
use hydro_hardware::{ReplayProbe, SimulatedReservoir};
use hydro_traits::{Actuator, Clock, Measurement, Probe};

use crate::cli::SimArgs;
use crate::error_fmt::Interrupted;

/// Output stage chosen for this process.
pub struct Outputs {
    pub actuator: Box<dyn Actuator>,
    pub simulated: bool,
}

/// Real PWM outputs when built with `hardware` and `[pins]` is populated,
/// the simulated reservoir otherwise.
pub fn make_actuator(cfg: &Config, sim: &SimulatedReservoir) -> eyre::Result<Outputs> {
    #[cfg(feature = "hardware")]
    {
        let p = &cfg.pins;
        let pins: Vec<(u8, u8)> = [p.ph_up, p.ph_down, p.nutrient_a, p.nutrient_b]
            .into_iter()
            .zip(cfg.channels.as_array())
            .filter_map(|(pin, ch)| pin.map(|bcm| (ch, bcm)))
            .collect();
        if !pins.is_empty() {
            let pwm = hydro_hardware::PwmActuator::try_new(&pins, p.pwm_hz)
                .wrap_err("open pwm outputs")?;
            tracing::info!(outputs = pins.len(), pwm_hz = p.pwm_hz, "hardware pwm outputs");
            return Ok(Outputs {
                actuator: Box::new(pwm),
                simulated: false,
            });
        }
        tracing::warn!("no [pins] configured; using simulated outputs");
    }
    #[cfg(not(feature = "hardware"))]
    {
        let _ = cfg; // silence unused
    }
    Ok(Outputs {
        actuator: Box::new(sim.actuator()),
        simulated: true,
    })
}

/// Replay a recorded CSV when given, otherwise read the simulated reservoir.
pub fn make_probe<C: Clock + 'static>(
    replay: Option<&Path>,
    clock: C,
    sim: &SimulatedReservoir,
) -> eyre::Result<Box<dyn Probe>> {
    let Some(path) = replay else {
        return Ok(Box::new(sim.probe()));
    };
    let rows = hydro_config::load_measurements_csv(path)?;
    let recorded: Vec<Measurement> = rows
        .iter()
        .map(|r| measurement_from_row(r, 0))
        .collect();
    tracing::info!(rows = recorded.len(), path = %path.display(), "replaying measurements");
    let probe = ReplayProbe::new(recorded, clock).wrap_err("replay probe")?;
    Ok(Box::new(probe))
}

pub fn build_controller<C: Clock + Clone + Send + Sync + 'static>(
    cfg: &Config,
    clock: &C,
    actuator: Box<dyn Actuator>,
    auto: bool,
    target: Option<f32>,
) -> eyre::Result<Controller<Box<dyn Actuator>>> {
    let core_cfg = ControllerCfg::from(cfg);
    let mut ctrl = Controller::builder()
        .with_actuator(actuator)
        .with_config(core_cfg)
        .with_clock(clock.clone())
        .with_auto(auto || cfg.runner.auto_enable)
        .build()?;
    if let Some(ph) = target {
        let applied = ctrl.set_target(ph);
        if (applied - ph).abs() > f32::EPSILON {
            tracing::warn!(requested = ph, applied, "set-point clamped");
        }
    }
    Ok(ctrl)
}

fn simulated_reservoir<C: Clock + Clone + 'static>(clock: &C, sim: SimArgs) -> SimulatedReservoir {
    SimulatedReservoir::new(clock.clone(), sim.ph, sim.volume_liters)
}

pub struct RunRequest<'a> {
    pub duration_s: Option<u64>,
    pub replay: Option<&'a Path>,
    pub target: Option<f32>,
    pub auto: bool,
    pub sim: SimArgs,
}

/// Run the control loop until the duration elapses or Ctrl-C.
pub fn run_loop<C: Clock + Clone + Send + Sync + 'static>(
    cfg: &Config,
    clock: C,
    req: &RunRequest<'_>,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<RunSummary> {
    let reservoir = simulated_reservoir(&clock, req.sim);
    let outputs = make_actuator(cfg, &reservoir)?;
    let mut probe = make_probe(req.replay, clock.clone(), &reservoir)?;
    let mut ctrl = build_controller(cfg, &clock, outputs.actuator, req.auto, req.target)?;

    let mut params = RunParams::from(&cfg.runner);
    params.duration_ms = req.duration_s.map(|s| s.saturating_mul(1_000));

    let summary = hydro_core::run(&mut ctrl, &mut probe, &params, shutdown)?;
    ctrl.shutdown();
    if outputs.simulated && req.replay.is_none() {
        tracing::info!(ph = reservoir.ph(), "simulated reservoir at exit");
    }
    if shutdown.load(Ordering::Relaxed) && req.duration_s.is_some() {
        return Err(Interrupted.into());
    }
    Ok(summary)
}

/// Result of a one-shot dose.
pub struct DoseOutcome {
    pub plan: DosePlan,
    pub elapsed_ms: u64,
    pub total_dosed_ml: f32,
    /// Volume the simulated pump actually moved (priming included).
    pub simulated_ml: Option<f32>,
}

/// Boot, dispense one dose, and wait until the pump leaves Priming/Dosing.
pub fn dose_once<C: Clock + Clone + Send + Sync + 'static>(
    cfg: &Config,
    clock: C,
    pump: PumpId,
    ml: f32,
    sim: SimArgs,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<DoseOutcome> {
    let reservoir = simulated_reservoir(&clock, sim);
    let outputs = make_actuator(cfg, &reservoir)?;
    let mut ctrl = build_controller(cfg, &clock, outputs.actuator, false, None)?;
    ctrl.boot().map_err(CoreError::from).wrap_err("boot")?;

    let start = ctrl.now_ms();
    let plan = ctrl.manual_dose(pump, ml)?;
    let period = Duration::from_millis(cfg.runner.loop_period_ms.max(1));

    loop {
        if shutdown.load(Ordering::Relaxed) {
            ctrl.stop_all();
            return Err(Interrupted.into());
        }
        let report = ctrl.tick(None);
        if let Some(fault) = report
            .faults
            .into_iter()
            .find(|f| matches!(f, CoreError::HardTimeout { pump: p, .. } if *p == pump))
        {
            ctrl.stop_all();
            return Err(fault.into());
        }
        match ctrl.state().pump(pump) {
            PumpState::Priming | PumpState::Dosing => clock.sleep(period),
            _ => break,
        }
    }

    let elapsed_ms = ctrl.now_ms().saturating_sub(start);
    ctrl.stop_all();
    let channel = ctrl.cfg().channel(pump);
    Ok(DoseOutcome {
        plan,
        elapsed_ms,
        total_dosed_ml: ctrl.total_dosed(pump),
        simulated_ml: outputs.simulated.then(|| reservoir.delivered_ml(channel)),
    })
}

/// Boot a controller and return it for inspection.
pub fn booted<C: Clock + Clone + Send + Sync + 'static>(
    cfg: &Config,
    clock: C,
) -> eyre::Result<Controller<Box<dyn Actuator>>> {
    let reservoir = simulated_reservoir(&clock, SimArgs {
        ph: 6.0,
        volume_liters: 20.0,
    });
    let outputs = make_actuator(cfg, &reservoir)?;
    let mut ctrl = build_controller(cfg, &clock, outputs.actuator, false, None)?;
    ctrl.set_verbose(false);
    ctrl.boot().map_err(CoreError::from).wrap_err("boot")?;
    Ok(ctrl)
}

/// One probe reading through the configured path, checked against the limits.
pub fn self_check<C: Clock + Clone + Send + Sync + 'static>(
    cfg: &Config,
    clock: C,
    sim: SimArgs,
) -> eyre::Result<Measurement> {
    let reservoir = simulated_reservoir(&clock, sim);
    let outputs = make_actuator(cfg, &reservoir)?;
    let mut probe = make_probe(None, clock.clone(), &reservoir)?;
    let ctrl = build_controller(cfg, &clock, outputs.actuator, false, None)?;

    let timeout = Duration::from_millis(cfg.runner.probe_timeout_ms.max(1));
    let m = probe
        .read(timeout)
        .map_err(|e| hydro_core::map_hw_error(&*e))
        .wrap_err("probe read")?;
    if m.valid {
        ctrl.engine().validate(m.ph, m.volume_liters)?;
    } else {
        tracing::warn!("probe returned an invalid reading");
    }
    Ok(m)
}
