#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and measurement CSV parsing for the reservoir controller.
//!
//! - `Config` and its sections are deserialized from TOML; every section is
//!   optional and falls back to the controller's stock constants.
//! - `Config::validate` rejects values the controller cannot run with.
//! - The measurement CSV loader enforces headers so replayed logs line up
//!   with the probe record.
use serde::Deserialize;

/// Measurement CSV schema.
///
/// Expected headers:
/// ph,conductivity,volume_liters,temperature
///
/// Example:
/// ph,conductivity,volume_liters,temperature
/// 6.8,1.4,20.0,22.5
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct MeasurementRow {
    pub ph: f32,
    pub conductivity: f32,
    pub volume_liters: f32,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// pH set-point the controller steers towards
    pub setpoint_ph: f32,
    /// Symmetric bound on the accumulated integral term
    pub integral_limit: f32,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 8.0,
            ki: 0.5,
            kd: 2.0,
            setpoint_ph: 6.0,
            integral_limit: 50.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Safety {
    /// Minimum spacing between two accepted doses on the same pump
    pub min_dose_interval_ms: u64,
    pub max_doses_per_hour: u32,
    /// Length of the rolling dose-quota window
    pub hour_window_ms: u64,
    pub min_dose_ml: f32,
    pub max_dose_ml: f32,
    /// Absolute ceiling on time spent in Dosing
    pub max_run_ms: u64,
    pub priming_timeout_ms: u64,
    /// Time a pump stays in Error before it is released back to Idle
    pub pump_error_recovery_ms: u64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            min_dose_interval_ms: 300_000,
            max_doses_per_hour: 3,
            hour_window_ms: 3_600_000,
            min_dose_ml: 5.0,
            max_dose_ml: 25.0,
            max_run_ms: 600_000,
            priming_timeout_ms: 5_000,
            pump_error_recovery_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct FlowCfg {
    /// Slowest rate the pumps deliver reliably (ml/min)
    pub min_rate_ml_min: f32,
    /// Rate delivered at full duty (ml/min)
    pub max_rate_ml_min: f32,
    /// Rate used for automatic and manual volume doses
    pub default_rate_ml_min: f32,
    /// Duty percentage corresponding to `min_rate_ml_min`
    pub min_duty_pct: f32,
}

impl Default for FlowCfg {
    fn default() -> Self {
        Self {
            min_rate_ml_min: 5.2,
            max_rate_ml_min: 90.0,
            default_rate_ml_min: 30.0,
            min_duty_pct: 10.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SequencerCfg {
    /// Time spent priming at low duty before dosing starts
    pub priming_ms: u64,
    pub priming_duty_pct: f32,
}

impl Default for SequencerCfg {
    fn default() -> Self {
        Self {
            priming_ms: 2_500,
            priming_duty_pct: 25.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Timeouts {
    pub device_error_recovery_ms: u64,
    /// Cool-down lockout after a completed dose
    pub cooldown_ms: u64,
    pub sensor_error_recovery_ms: u64,
    /// Sensing stuck in WarmingUp longer than this is treated as a fault
    pub sensor_warmup_timeout_ms: u64,
    pub status_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            device_error_recovery_ms: 5_000,
            cooldown_ms: 300_000,
            sensor_error_recovery_ms: 10_000,
            sensor_warmup_timeout_ms: 5_000,
            status_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Limits {
    pub ph_min: f32,
    pub ph_max: f32,
    pub volume_min_l: f32,
    pub volume_max_l: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            ph_min: 4.0,
            ph_max: 9.0,
            volume_min_l: 5.0,
            volume_max_l: 200.0,
        }
    }
}

/// Actuator channel per pump.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Channels {
    pub ph_up: u8,
    pub ph_down: u8,
    pub nutrient_a: u8,
    pub nutrient_b: u8,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            ph_up: 0,
            ph_down: 1,
            nutrient_a: 2,
            nutrient_b: 3,
        }
    }
}

impl Channels {
    pub fn as_array(&self) -> [u8; 4] {
        [self.ph_up, self.ph_down, self.nutrient_a, self.nutrient_b]
    }
}

/// GPIO pins for the PWM actuator. Only consulted with the `hardware` feature.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Pins {
    pub ph_up: Option<u8>,
    pub ph_down: Option<u8>,
    pub nutrient_a: Option<u8>,
    pub nutrient_b: Option<u8>,
    pub pwm_hz: f64,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            ph_up: None,
            ph_down: None,
            nutrient_a: None,
            nutrient_b: None,
            pwm_hz: 1_000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RunnerCfg {
    /// Host loop period
    pub loop_period_ms: u64,
    /// How often a measurement is taken from the probe
    pub sample_interval_ms: u64,
    /// Enable automatic pH correction at boot
    pub auto_enable: bool,
    /// Consecutive invalid readings tolerated before the device enters Error
    pub max_invalid_readings: u32,
    /// Per-read probe timeout
    pub probe_timeout_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            loop_period_ms: 100,
            sample_interval_ms: 5_000,
            auto_enable: false,
            max_invalid_readings: 3,
            probe_timeout_ms: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub pid: PidCfg,
    pub safety: Safety,
    pub flow: FlowCfg,
    pub sequencer: SequencerCfg,
    pub timeouts: Timeouts,
    pub limits: Limits,
    pub channels: Channels,
    pub pins: Pins,
    pub runner: RunnerCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Load every row of a measurement CSV, enforcing the exact header set.
pub fn load_measurements_csv(path: &std::path::Path) -> eyre::Result<Vec<MeasurementRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open measurement CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["ph", "conductivity", "volume_liters", "temperature"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "measurement CSV must have headers 'ph,conductivity,volume_liters,temperature', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<MeasurementRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.is_empty() {
        eyre::bail!("measurement CSV {:?} contains no rows", path);
    }
    Ok(rows)
}

fn in_range(v: f32, lo: f32, hi: f32) -> bool {
    v.is_finite() && v >= lo && v <= hi
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // PID
        if !(self.pid.kp.is_finite() && self.pid.kp > 0.0) {
            eyre::bail!("pid.kp must be > 0");
        }
        if !(self.pid.ki.is_finite() && self.pid.ki >= 0.0) {
            eyre::bail!("pid.ki must be >= 0");
        }
        if !(self.pid.kd.is_finite() && self.pid.kd >= 0.0) {
            eyre::bail!("pid.kd must be >= 0");
        }
        if !in_range(self.pid.setpoint_ph, 5.0, 8.0) {
            eyre::bail!("pid.setpoint_ph must be in [5.0, 8.0]");
        }
        if !(self.pid.integral_limit.is_finite() && self.pid.integral_limit > 0.0) {
            eyre::bail!("pid.integral_limit must be > 0");
        }

        // Safety
        if self.safety.max_doses_per_hour == 0 {
            eyre::bail!("safety.max_doses_per_hour must be >= 1");
        }
        if self.safety.hour_window_ms == 0 {
            eyre::bail!("safety.hour_window_ms must be >= 1");
        }
        if !(self.safety.min_dose_ml.is_finite() && self.safety.min_dose_ml > 0.0) {
            eyre::bail!("safety.min_dose_ml must be > 0");
        }
        if !(self.safety.max_dose_ml.is_finite()
            && self.safety.max_dose_ml >= self.safety.min_dose_ml)
        {
            eyre::bail!("safety.max_dose_ml must be >= safety.min_dose_ml");
        }
        if self.safety.max_run_ms == 0 {
            eyre::bail!("safety.max_run_ms must be >= 1");
        }
        if self.safety.max_run_ms > 24 * 60 * 60 * 1000 {
            eyre::bail!("safety.max_run_ms is unreasonably large (>24h)");
        }
        if self.safety.priming_timeout_ms == 0 {
            eyre::bail!("safety.priming_timeout_ms must be >= 1");
        }

        // Flow
        if !(self.flow.min_rate_ml_min.is_finite() && self.flow.min_rate_ml_min > 0.0) {
            eyre::bail!("flow.min_rate_ml_min must be > 0");
        }
        if !(self.flow.max_rate_ml_min.is_finite()
            && self.flow.max_rate_ml_min > self.flow.min_rate_ml_min)
        {
            eyre::bail!("flow.max_rate_ml_min must be > flow.min_rate_ml_min");
        }
        if !in_range(
            self.flow.default_rate_ml_min,
            self.flow.min_rate_ml_min,
            self.flow.max_rate_ml_min,
        ) {
            eyre::bail!("flow.default_rate_ml_min must lie within [min_rate_ml_min, max_rate_ml_min]");
        }
        if !in_range(self.flow.min_duty_pct, 0.0, 100.0) {
            eyre::bail!("flow.min_duty_pct must be in [0.0, 100.0]");
        }

        // Sequencer
        if !in_range(self.sequencer.priming_duty_pct, 0.0, 100.0) {
            eyre::bail!("sequencer.priming_duty_pct must be in [0.0, 100.0]");
        }
        if self.sequencer.priming_ms >= self.safety.priming_timeout_ms {
            eyre::bail!("sequencer.priming_ms must be < safety.priming_timeout_ms");
        }

        // Timeouts
        if self.timeouts.status_interval_ms == 0 {
            eyre::bail!("timeouts.status_interval_ms must be >= 1");
        }

        // Limits
        if !(self.limits.ph_min.is_finite() && self.limits.ph_min < self.limits.ph_max) {
            eyre::bail!("limits.ph_min must be < limits.ph_max");
        }
        if !(self.limits.volume_min_l.is_finite()
            && self.limits.volume_min_l > 0.0
            && self.limits.volume_min_l < self.limits.volume_max_l)
        {
            eyre::bail!("limits.volume_min_l must be > 0 and < limits.volume_max_l");
        }

        // Channels
        let ch = self.channels.as_array();
        for i in 0..ch.len() {
            if ch[i + 1..].contains(&ch[i]) {
                eyre::bail!("channels must be distinct (channel {} used twice)", ch[i]);
            }
        }

        // Pins
        if !(self.pins.pwm_hz.is_finite() && self.pins.pwm_hz > 0.0) {
            eyre::bail!("pins.pwm_hz must be > 0");
        }

        // Runner
        if self.runner.loop_period_ms == 0 {
            eyre::bail!("runner.loop_period_ms must be >= 1");
        }
        if self.runner.sample_interval_ms < self.runner.loop_period_ms {
            eyre::bail!("runner.sample_interval_ms must be >= runner.loop_period_ms");
        }
        if self.runner.probe_timeout_ms == 0 {
            eyre::bail!("runner.probe_timeout_ms must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
