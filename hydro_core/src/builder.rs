//! Type-state builder for `Controller`.
//!
//! `build()` is only available once an actuator is set; `try_build()` is
//! always available and reports what is missing.

use std::marker::PhantomData;
use std::sync::Arc;

use hydro_traits::{Actuator, Clock, MonotonicClock};

use crate::config::ControllerCfg;
use crate::controller::Controller;
use crate::error::{BuildError, Result};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `Controller`. Configuration is validated on build.
pub struct ControllerBuilder<S, A> {
    actuator: Option<A>,
    cfg: Option<ControllerCfg>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    auto_enable: bool,
    verbose: bool,
    _s: PhantomData<S>,
}

impl ControllerBuilder<Missing, Box<dyn Actuator>> {
    pub fn new() -> Self {
        Self {
            actuator: None,
            cfg: None,
            clock: None,
            auto_enable: false,
            verbose: true,
            _s: PhantomData,
        }
    }
}

impl Default for ControllerBuilder<Missing, Box<dyn Actuator>> {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and construct a `Controller`.
///
/// Single source of truth for validation, used by `try_build()` and `build_controller()`.
fn validate_and_build<A: Actuator>(
    actuator: A,
    cfg: ControllerCfg,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    auto_enable: bool,
    verbose: bool,
) -> Result<Controller<A>> {
    // ── Validation ───────────────────────────────────────────────────────────
    let invalid = |msg: &'static str| Err(eyre::Report::new(BuildError::InvalidConfig(msg)));

    if !(cfg.pid.gains.kp.is_finite() && cfg.pid.gains.kp > 0.0) {
        return invalid("kp must be > 0");
    }
    if !(5.0..=8.0).contains(&cfg.pid.setpoint_ph) {
        return invalid("setpoint_ph must be in [5.0, 8.0]");
    }
    if !(cfg.pid.integral_limit.is_finite() && cfg.pid.integral_limit > 0.0) {
        return invalid("integral_limit must be > 0");
    }
    if !(cfg.safety.min_dose_ml > 0.0 && cfg.safety.max_dose_ml >= cfg.safety.min_dose_ml) {
        return invalid("dose limits must satisfy 0 < min_dose_ml <= max_dose_ml");
    }
    if cfg.safety.max_doses_per_hour == 0 || cfg.safety.hour_window_ms == 0 {
        return invalid("hourly quota and window must be > 0");
    }
    if cfg.safety.max_run_ms == 0 {
        return invalid("max_run_ms must be >= 1");
    }
    if !(cfg.flow.min_rate_ml_min > 0.0 && cfg.flow.max_rate_ml_min > cfg.flow.min_rate_ml_min) {
        return invalid("flow range must satisfy 0 < min_rate < max_rate");
    }
    if !(cfg.flow.min_rate_ml_min..=cfg.flow.max_rate_ml_min)
        .contains(&cfg.flow.default_rate_ml_min)
    {
        return invalid("default_rate_ml_min must lie within the flow range");
    }
    if cfg.sequencer.priming_ms >= cfg.safety.priming_timeout_ms {
        return invalid("priming_ms must be < priming_timeout_ms");
    }
    if !(cfg.limits.ph_min < cfg.limits.ph_max && cfg.limits.volume_min_l < cfg.limits.volume_max_l)
    {
        return invalid("measurement limits must be ordered min < max");
    }
    for (i, ch) in cfg.channels.iter().enumerate() {
        if cfg.channels[i + 1..].contains(ch) {
            return invalid("pump channels must be distinct");
        }
    }

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(c) => c,
        None => Arc::new(MonotonicClock::new()),
    };

    let mut controller = Controller::from_parts(actuator, cfg, clock);
    if !verbose {
        controller.set_verbose(false);
    }
    if auto_enable {
        controller.enable_auto(true);
    }
    Ok(controller)
}

impl<S, A: Actuator> ControllerBuilder<S, A> {
    /// Fallible build available in any type-state; returns a detailed error for missing pieces.
    pub fn try_build(self) -> Result<Controller<A>> {
        let actuator = self
            .actuator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingActuator))?;
        validate_and_build(
            actuator,
            self.cfg.unwrap_or_default(),
            self.clock,
            self.auto_enable,
            self.verbose,
        )
    }
}

/// Chainable setters that do not affect type-state.
impl<S, A> ControllerBuilder<S, A> {
    pub fn with_config(mut self, cfg: ControllerCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Provide a custom clock; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Start with automatic feedback dosing enabled.
    pub fn with_auto(mut self, enabled: bool) -> Self {
        self.auto_enable = enabled;
        self
    }

    /// Verbose transition logging (on by default).
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

// Setter that advances type-state
impl<A> ControllerBuilder<Missing, A> {
    pub fn with_actuator<B: Actuator>(self, actuator: B) -> ControllerBuilder<Set, B> {
        ControllerBuilder {
            actuator: Some(actuator),
            cfg: self.cfg,
            clock: self.clock,
            auto_enable: self.auto_enable,
            verbose: self.verbose,
            _s: PhantomData,
        }
    }
}

impl<A: Actuator> ControllerBuilder<Set, A> {
    /// Validate and build. Only available once an actuator is set.
    pub fn build(self) -> Result<Controller<A>> {
        self.try_build()
    }
}

/// Build a `Controller` directly from its parts.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_controller<A: Actuator>(
    actuator: A,
    cfg: ControllerCfg,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
) -> Result<Controller<A>> {
    validate_and_build(actuator, cfg, clock, false, true)
}

impl Controller<Box<dyn Actuator>> {
    /// Start building a Controller.
    pub fn builder() -> ControllerBuilder<Missing, Box<dyn Actuator>> {
        ControllerBuilder::new()
    }
}
