use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use hydro_core::{Controller, DeviceState, PumpId, RunParams, SensorState, run};
use hydro_hardware::SimulatedReservoir;
use hydro_traits::{ManualClock, Measurement, Probe};
use rstest::rstest;

fn params(duration_ms: u64) -> RunParams {
    RunParams {
        duration_ms: Some(duration_ms),
        ..RunParams::default()
    }
}

#[rstest]
fn simulated_reservoir_is_pulled_toward_target() {
    let clock = ManualClock::new();
    let reservoir = SimulatedReservoir::new(clock.clone(), 7.0, 20.0).with_drift(0.0);
    let mut ctrl = Controller::builder()
        .with_actuator(reservoir.actuator())
        .with_clock(clock.clone())
        .with_auto(true)
        .with_verbose(false)
        .build()
        .expect("build controller");
    let mut probe = reservoir.probe();
    let stop = AtomicBool::new(false);

    let summary = run(&mut ctrl, &mut probe, &params(120_000), &stop).expect("run");

    assert_eq!(summary.doses_started, 1);
    assert!((summary.dosed_ml - 21.0).abs() < 1e-3);
    assert_eq!(summary.readings, 24);
    assert_eq!(summary.probe_failures, 0);
    assert!(summary.iterations >= 1_200);
    assert!(reservoir.ph() < 7.0, "ph {}", reservoir.ph());
    assert!(reservoir.delivered_ml(1) > 19.0, "{}", reservoir.delivered_ml(1));
    assert_eq!(summary.final_status.device, DeviceState::Monitoring);
    assert_eq!(ctrl.state().pump(PumpId::PhDown), hydro_core::PumpState::Idle);
    assert_eq!(reservoir.duty(1), 0);
}

#[rstest]
fn probe_failure_parks_sensing_in_error() {
    let clock = ManualClock::new();
    let reservoir = SimulatedReservoir::new(clock.clone(), 6.0, 20.0).with_drift(0.0);
    reservoir.fail_next_reads(1);
    let mut ctrl = Controller::builder()
        .with_actuator(reservoir.actuator())
        .with_clock(clock.clone())
        .with_verbose(false)
        .build()
        .expect("build controller");
    let mut probe = reservoir.probe();

    let summary = run(&mut ctrl, &mut probe, &params(1_000), &AtomicBool::new(false))
        .expect("run");
    assert_eq!(summary.probe_failures, 1);
    assert_eq!(summary.readings, 0);
    assert_eq!(ctrl.state().sensor(), SensorState::Error);
}

#[rstest]
fn shutdown_flag_stops_before_the_first_iteration() {
    let clock = ManualClock::new();
    let reservoir = SimulatedReservoir::new(clock.clone(), 6.0, 20.0);
    let mut ctrl = Controller::builder()
        .with_actuator(reservoir.actuator())
        .with_clock(clock.clone())
        .with_verbose(false)
        .build()
        .expect("build controller");
    let mut probe = reservoir.probe();

    let summary = run(&mut ctrl, &mut probe, &RunParams::default(), &AtomicBool::new(true))
        .expect("run");
    assert_eq!(summary.iterations, 0);
    assert_eq!(ctrl.state().device(), DeviceState::Monitoring);
}

struct Invalid;

impl Probe for Invalid {
    fn read(&mut self, _timeout: Duration) -> Result<Measurement, Box<dyn Error + Send + Sync>> {
        Ok(Measurement::invalid(0))
    }
}

#[rstest]
fn invalid_stream_faults_the_device() {
    let clock = ManualClock::new();
    let reservoir = SimulatedReservoir::new(clock.clone(), 6.0, 20.0);
    let mut ctrl = Controller::builder()
        .with_actuator(reservoir.actuator())
        .with_clock(clock.clone())
        .with_verbose(false)
        .build()
        .expect("build controller");

    let summary = run(&mut ctrl, &mut Invalid, &params(20_001), &AtomicBool::new(false))
        .expect("run");
    assert_eq!(summary.readings, 5);
    assert_eq!(summary.faults, 1);
}
