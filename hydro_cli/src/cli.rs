//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand};
use hydro_core::PumpId;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

/// Config file used when `--config` is not given. Missing means built-in defaults.
pub const DEFAULT_CONFIG: &str = "etc/hydro_config.toml";

#[derive(Parser, Debug)]
#[command(name = "hydro", version, about = "Reservoir pH dosing controller")]
pub struct Cli {
    /// Path to config TOML; defaults to etc/hydro_config.toml when present
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print results and errors as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides logging.level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Simulated time: the loop fast-forwards instead of sleeping
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub fast: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Starting conditions for the simulated reservoir.
#[derive(Args, Debug, Clone, Copy)]
pub struct SimArgs {
    /// Initial simulated pH
    #[arg(long = "sim-ph", value_name = "PH", default_value_t = 6.0)]
    pub ph: f32,
    /// Simulated reservoir volume in litres
    #[arg(long = "sim-volume", value_name = "LITRES", default_value_t = 20.0)]
    pub volume_liters: f32,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop
    Run {
        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(long = "duration-s", value_name = "SECS")]
        duration_s: Option<u64>,
        /// Play back measurements from a CSV (ph,conductivity,volume_liters,temperature)
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,
        /// pH set-point (clamped to 5.0..=8.0)
        #[arg(long, value_name = "PH")]
        target: Option<f32>,
        /// Enable automatic pH correction
        #[arg(long, action = ArgAction::SetTrue)]
        auto: bool,
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Dispense a fixed volume with one pump and wait for it to finish
    Dose {
        /// Pump to run (ph_up, ph_down, nutrient_a, nutrient_b)
        #[arg(long, value_name = "PUMP")]
        pump: PumpId,
        /// Volume in millilitres (clamped to the configured dose limits)
        #[arg(long, value_name = "ML")]
        ml: f32,
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Print the controller status after boot
    Status,
    /// Quick health check: config, outputs and one probe reading
    SelfCheck {
        #[command(flatten)]
        sim: SimArgs,
    },
    /// Print the state-machine transition tables
    Transitions,
}
