mod cli;
mod dose;
mod error_fmt;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use hydro_config::Config;
use hydro_core::{
    CalibrationState, DeviceState, MachineState, PumpState, SensorState, StatusSnapshot,
};
use hydro_traits::{Clock, ManualClock, MonotonicClock};
use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, Commands, DEFAULT_CONFIG, FILE_GUARD, JSON_MODE};
use crate::dose::RunRequest;
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    if cli.fast {
        execute(&cli, &cfg, ManualClock::new(), &shutdown)
    } else {
        execute(&cli, &cfg, MonotonicClock::new(), &shutdown)
    }
}

/// Explicit `--config` must exist; the default path falls back to built-in defaults.
fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let (path, explicit) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_CONFIG), false),
    };
    if !explicit && !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = hydro_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing(json: bool, level: Option<&str>, logging: &hydro_config::Logging) {
    let level = level.or(logging.level.as_deref()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| "hydro.log".into(), |n| n.to_string_lossy().into_owned());
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer().json().with_ansi(false).with_writer(writer)
    });

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let res = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing init failed: {e}");
    }
}

fn execute<C: Clock + Clone + Send + Sync + 'static>(
    cli: &Cli,
    cfg: &Config,
    clock: C,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<()> {
    match &cli.cmd {
        Commands::Run {
            duration_s,
            replay,
            target,
            auto,
            sim,
        } => {
            let req = RunRequest {
                duration_s: *duration_s,
                replay: replay.as_deref(),
                target: *target,
                auto: *auto,
                sim: *sim,
            };
            let s = dose::run_loop(cfg, clock, &req, shutdown)?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "iterations": s.iterations,
                        "readings": s.readings,
                        "probe_failures": s.probe_failures,
                        "doses_started": s.doses_started,
                        "dosed_ml": s.dosed_ml,
                        "blocked": s.blocked,
                        "below_minimum": s.below_minimum,
                        "rejected": s.rejected,
                        "faults": s.faults,
                        "status": status_json(&s.final_status),
                    })
                );
            } else {
                println!(
                    "run finished: {} iterations, {} readings, {} doses ({:.1} ml), {} blocked, {} faults",
                    s.iterations, s.readings, s.doses_started, s.dosed_ml, s.blocked, s.faults
                );
                print!("{}", s.final_status);
            }
        }
        Commands::Dose { pump, ml, sim } => {
            let out = dose::dose_once(cfg, clock, *pump, *ml, *sim, shutdown)?;
            if cli.json {
                println!(
                    "{}",
                    json!({
                        "pump": out.plan.pump.as_str(),
                        "volume_ml": out.plan.volume_ml,
                        "rate_ml_min": out.plan.rate_ml_min,
                        "duty": out.plan.duty,
                        "run_ms": out.plan.run_ms,
                        "elapsed_ms": out.elapsed_ms,
                        "total_dosed_ml": out.total_dosed_ml,
                        "simulated_ml": out.simulated_ml,
                    })
                );
            } else {
                println!(
                    "dosed {:.1} ml with {} in {:.1} s (duty {}, run {} ms)",
                    out.plan.volume_ml,
                    out.plan.pump,
                    hydro_core::util::secs(out.elapsed_ms),
                    out.plan.duty,
                    out.plan.run_ms
                );
            }
        }
        Commands::Status => {
            let ctrl = dose::booted(cfg, clock)?;
            let snap = ctrl.status_snapshot();
            if cli.json {
                println!("{}", status_json(&snap));
            } else {
                print!("{snap}");
            }
        }
        Commands::SelfCheck { sim } => {
            let m = dose::self_check(cfg, clock, *sim)?;
            if cli.json {
                println!(
                    "{}",
                    json!({ "ok": true, "ph": m.ph, "volume_liters": m.volume_liters, "valid": m.valid })
                );
            } else {
                println!(
                    "ok: probe ph {:.2}, volume {:.1} L{}",
                    m.ph,
                    m.volume_liters,
                    if m.valid { "" } else { " (invalid reading)" }
                );
            }
        }
        Commands::Transitions => print_transitions(cli.json),
    }
    Ok(())
}

fn status_json(s: &StatusSnapshot) -> serde_json::Value {
    let pumps: Vec<_> = s
        .pumps
        .iter()
        .map(|p| {
            json!({
                "pump": p.pump.as_str(),
                "state": p.state.to_string(),
                "in_state_ms": p.in_state_ms,
                "running": p.running,
                "duty": p.duty,
                "remaining_ms": p.remaining_ms,
                "doses_this_hour": p.doses_this_hour,
                "max_doses_per_hour": p.max_doses_per_hour,
                "next_dose_in_ms": p.next_dose_in_ms,
                "total_dosed_ml": p.total_dosed_ml,
            })
        })
        .collect();
    json!({
        "now_ms": s.now_ms,
        "device": s.device.to_string(),
        "device_ms": s.device_ms,
        "sensor": s.sensor.to_string(),
        "sensor_ms": s.sensor_ms,
        "calibration": s.calibration.to_string(),
        "auto_enabled": s.auto_enabled,
        "target_ph": s.target_ph,
        "gains": { "kp": s.gains.kp, "ki": s.gains.ki, "kd": s.gains.kd },
        "pumps": pumps,
    })
}

fn table<S: MachineState + std::fmt::Display>(all: &[S]) -> Vec<(String, Vec<String>)> {
    all.iter()
        .map(|from| {
            let to = all
                .iter()
                .filter(|to| *to != from && from.permits(**to))
                .map(ToString::to_string)
                .collect();
            (from.to_string(), to)
        })
        .collect()
}

fn print_transitions(as_json: bool) {
    let machines = [
        (DeviceState::MACHINE, table(&DeviceState::ALL)),
        (PumpState::MACHINE, table(&PumpState::ALL)),
        (SensorState::MACHINE, table(&SensorState::ALL)),
        (CalibrationState::MACHINE, table(&CalibrationState::ALL)),
    ];
    if as_json {
        let obj: serde_json::Map<String, serde_json::Value> = machines
            .iter()
            .map(|(name, rows)| {
                let rows: serde_json::Map<String, serde_json::Value> = rows
                    .iter()
                    .map(|(from, to)| (from.clone(), json!(to)))
                    .collect();
                ((*name).to_string(), serde_json::Value::Object(rows))
            })
            .collect();
        println!("{}", serde_json::Value::Object(obj));
        return;
    }
    for (name, rows) in &machines {
        for (from, to) in rows {
            println!("{name:<12} {from:<13} -> {}", to.join(" | "));
        }
    }
}
