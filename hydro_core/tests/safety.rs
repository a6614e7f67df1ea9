use std::error::Error;
use std::sync::{Arc, Mutex};

use hydro_core::{
    CalibrationState, Controller, CoreError, DeviceState, PumpId, PumpState, SensorState,
};
use hydro_traits::{Actuator, ManualClock, Measurement};
use rstest::rstest;

#[derive(Clone, Default)]
struct Outputs(Arc<Mutex<[u8; 4]>>);

impl Outputs {
    fn get(&self, channel: u8) -> u8 {
        self.0.lock().unwrap()[usize::from(channel)]
    }
}

impl Actuator for Outputs {
    fn set_duty(&mut self, channel: u8, duty: u8) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.0.lock().unwrap()[usize::from(channel)] = duty;
        Ok(())
    }
}

fn controller(clock: &ManualClock) -> (Controller<Outputs>, Outputs) {
    let out = Outputs::default();
    let mut c = Controller::builder()
        .with_actuator(out.clone())
        .with_clock(clock.clone())
        .with_verbose(false)
        .build()
        .expect("build controller");
    c.boot().expect("boot");
    (c, out)
}

#[rstest]
fn run_past_the_ceiling_is_forced_to_error() {
    let clock = ManualClock::new();
    let (mut c, out) = controller(&clock);

    c.start_manual(PumpId::PhUp, 30.0).expect("manual run");
    c.tick(None);
    clock.advance_ms(2_500);
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::PhUp), PumpState::Dosing);
    assert_eq!(out.get(0), 92);

    clock.advance_ms(605_000);
    let report = c.tick(None);
    assert_eq!(c.state().pump(PumpId::PhUp), PumpState::Error);
    assert_eq!(out.get(0), 0);
    assert!(report.faults.contains(&CoreError::HardTimeout {
        pump: PumpId::PhUp,
        phase: PumpState::Dosing,
        elapsed_ms: 605_000,
    }));
    // 605 s at 30 ml/min.
    assert!((c.total_dosed(PumpId::PhUp) - 302.5).abs() < 1e-2);
}

#[rstest]
fn priming_stalled_past_its_timeout_is_forced_to_error() {
    let clock = ManualClock::new();
    let (mut c, out) = controller(&clock);

    c.manual_dose(PumpId::PhDown, 10.0).expect("dose");
    c.tick(None);
    assert_eq!(out.get(1), 63);

    // No iteration ran while priming, so the sequencer never promoted it.
    clock.advance_ms(5_001);
    let report = c.tick(None);
    assert_eq!(c.state().pump(PumpId::PhDown), PumpState::Error);
    assert_eq!(
        report.faults,
        vec![CoreError::HardTimeout {
            pump: PumpId::PhDown,
            phase: PumpState::Priming,
            elapsed_ms: 5_001,
        }]
    );
    assert_eq!(out.get(1), 0);
}

#[rstest]
fn priming_at_exactly_its_timeout_still_proceeds() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    c.manual_dose(PumpId::PhDown, 10.0).expect("dose");
    clock.advance_ms(5_000);
    let report = c.tick(None);
    assert!(report.faults.is_empty());
    assert_eq!(c.state().pump(PumpId::PhDown), PumpState::Dosing);
}

#[rstest]
fn pump_error_recovers_after_thirty_seconds() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    c.manual_dose(PumpId::PhDown, 10.0).expect("dose");
    clock.advance_ms(6_000);
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::PhDown), PumpState::Error);

    clock.advance_ms(30_000);
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::PhDown), PumpState::Error);

    clock.advance_ms(1);
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::PhDown), PumpState::Idle);
}

#[rstest]
fn emergency_stop_zeroes_everything_and_device_recovers() {
    let clock = ManualClock::new();
    let (mut c, out) = controller(&clock);

    c.manual_dose(PumpId::PhUp, 10.0).expect("dose");
    c.start_manual(PumpId::NutrientA, 60.0).expect("manual");
    c.tick(None);
    assert_eq!(out.get(0), 63);

    c.emergency_stop();
    assert_eq!(c.state().device(), DeviceState::Error);
    assert_eq!(c.state().sensor(), SensorState::Ready);
    for p in PumpId::ALL {
        assert_eq!(c.state().pump(p), PumpState::Idle);
        assert!(!c.is_running(p));
    }
    assert!((0..4).all(|ch| out.get(ch) == 0));

    clock.advance_ms(5_000);
    c.tick(None);
    assert_eq!(c.state().device(), DeviceState::Error);

    clock.advance_ms(1);
    c.tick(None);
    assert_eq!(c.state().device(), DeviceState::Monitoring);
}

#[rstest]
fn operator_can_release_device_error() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    assert!(!c.recover_from_error());
    c.emergency_stop();
    assert!(c.recover_from_error());
    assert_eq!(c.state().device(), DeviceState::Monitoring);
}

#[rstest]
fn repeated_invalid_readings_fault_the_device() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);
    c.enable_auto(true);

    for i in 0..3 {
        let report = c.tick(Some(&Measurement::invalid(i)));
        assert!(report.faults.is_empty());
        assert_eq!(report.device, DeviceState::Monitoring);
    }
    assert_eq!(c.invalid_streak(), 3);

    let report = c.tick(Some(&Measurement::invalid(3)));
    assert_eq!(report.device, DeviceState::Error);
    assert!(matches!(report.faults.as_slice(), [CoreError::DeviceFault(_)]));
}

#[rstest]
fn valid_reading_resets_the_invalid_streak() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    c.tick(Some(&Measurement::invalid(0)));
    c.tick(Some(&Measurement::invalid(0)));
    assert_eq!(c.invalid_streak(), 2);
    c.tick(Some(&Measurement::new(6.0, 20.0, 0)));
    assert_eq!(c.invalid_streak(), 0);
}

#[rstest]
fn sensing_error_recovers_after_ten_seconds() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    c.transition_sensor(SensorState::Error).expect("escape");
    clock.advance_ms(10_000);
    c.tick(None);
    assert_eq!(c.state().sensor(), SensorState::Error);
    clock.advance_ms(1);
    c.tick(None);
    assert_eq!(c.state().sensor(), SensorState::Ready);
}

#[rstest]
fn stuck_warmup_raises_timeout() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    c.transition_sensor(SensorState::WarmingUp).expect("warm up");
    clock.advance_ms(5_001);
    let report = c.tick(None);
    assert_eq!(c.state().sensor(), SensorState::Error);
    assert_eq!(report.faults, vec![CoreError::Timeout]);
}

#[rstest]
fn maintenance_holds_active_pumps_and_releases_them() {
    let clock = ManualClock::new();
    let (mut c, out) = controller(&clock);

    c.manual_dose(PumpId::PhUp, 10.0).expect("dose");
    c.tick(None);
    assert!(c.set_maintenance(true));
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::PhUp), PumpState::Maintenance);
    assert_eq!(out.get(0), 0);

    assert!(c.set_maintenance(false));
    assert_eq!(c.state().pump(PumpId::PhUp), PumpState::Idle);
    assert_eq!(c.state().device(), DeviceState::Monitoring);
}

#[rstest]
fn maintenance_hold_accounts_a_manual_run() {
    let clock = ManualClock::new();
    let (mut c, out) = controller(&clock);

    c.start_manual(PumpId::NutrientA, 30.0).expect("manual run");
    c.tick(None);
    clock.advance_ms(2_500);
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::NutrientA), PumpState::Dosing);

    clock.advance_ms(60_000);
    assert!(c.set_maintenance(true));
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::NutrientA), PumpState::Maintenance);
    assert_eq!(out.get(2), 0);
    assert!(!c.is_running(PumpId::NutrientA));
    assert!((c.total_dosed(PumpId::NutrientA) - 30.0).abs() < 1e-3);

    // Later stops must not count the run a second time.
    clock.advance_ms(10_000);
    assert!(c.set_maintenance(false));
    c.stop_all();
    assert!((c.total_dosed(PumpId::NutrientA) - 30.0).abs() < 1e-3);
}

#[rstest]
fn calibration_brackets_the_device_state() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    c.begin_calibration().expect("begin");
    assert_eq!(c.state().device(), DeviceState::Calibrating);
    assert_eq!(c.state().calibration(), CalibrationState::Active);
    assert!(c.manual_dose(PumpId::PhUp, 5.0).is_err());

    c.end_calibration().expect("end");
    assert_eq!(c.state().device(), DeviceState::Monitoring);
    assert_eq!(c.state().calibration(), CalibrationState::Idle);
}

#[rstest]
fn shutdown_and_reboot() {
    let clock = ManualClock::new();
    let (mut c, _out) = controller(&clock);

    c.manual_dose(PumpId::PhUp, 10.0).expect("dose");
    c.shutdown();
    assert_eq!(c.state().device(), DeviceState::Shutdown);
    assert_eq!(c.state().pump(PumpId::PhUp), PumpState::Idle);

    c.boot().expect("reboot");
    assert_eq!(c.state().device(), DeviceState::Monitoring);
}
