use std::error::Error;
use std::sync::{Arc, Mutex};

use hydro_core::{
    Controller, CoreError, DeviceState, DoseDecision, GateBlock, PumpId, PumpState,
};
use hydro_traits::{Actuator, ManualClock, Measurement};
use rstest::rstest;

/// Actuator that remembers every write.
#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(u8, u8)>>>);

impl Recorder {
    fn last_for(&self, channel: u8) -> Option<u8> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(ch, _)| *ch == channel)
            .map(|(_, d)| *d)
    }
}

impl Actuator for Recorder {
    fn set_duty(&mut self, channel: u8, duty: u8) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.0.lock().unwrap().push((channel, duty));
        Ok(())
    }
}

fn controller(clock: &ManualClock, auto: bool) -> (Controller<Recorder>, Recorder) {
    let rec = Recorder::default();
    let mut c = Controller::builder()
        .with_actuator(rec.clone())
        .with_clock(clock.clone())
        .with_auto(auto)
        .with_verbose(false)
        .build()
        .expect("build controller");
    c.boot().expect("boot");
    (c, rec)
}

#[rstest]
fn high_ph_in_twenty_litres_starts_a_21ml_down_dose() {
    let clock = ManualClock::new();
    let (mut c, rec) = controller(&clock, true);

    let report = c.tick(Some(&Measurement::new(7.0, 20.0, 0)));
    match report.decision {
        Some(DoseDecision::Started(plan)) => {
            assert_eq!(plan.pump, PumpId::PhDown);
            assert!((plan.volume_ml - 21.0).abs() < 1e-4, "{}", plan.volume_ml);
            assert!((plan.rate_ml_min - 30.0).abs() < f32::EPSILON);
            assert_eq!(plan.duty, 92);
            assert_eq!(plan.run_ms, 42_000);
            assert!(!plan.manual);
        }
        other => panic!("expected Started, got {other:?}"),
    }
    assert_eq!(c.state().pump(PumpId::PhDown), PumpState::Priming);
    assert_eq!(c.state().device(), DeviceState::Monitoring);
    assert_eq!(rec.last_for(1), Some(63), "priming duty on the down channel");
    assert!(c.is_running(PumpId::PhDown));

    let status = c.status_snapshot();
    let down = &status.pumps[PumpId::PhDown.index()];
    assert_eq!(down.doses_this_hour, 1);
    assert!((down.total_dosed_ml - 21.0).abs() < 1e-4);
}

#[rstest]
fn low_ph_selects_the_raising_pump() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, true);

    let report = c.tick(Some(&Measurement::new(5.0, 20.0, 0)));
    match report.decision {
        Some(DoseDecision::Started(plan)) => assert_eq!(plan.pump, PumpId::PhUp),
        other => panic!("expected Started, got {other:?}"),
    }
}

#[rstest]
#[case(6.2, PumpId::PhDown)]
#[case(6.0, PumpId::PhUp)]
fn small_corrections_are_below_minimum(#[case] ph: f32, #[case] pump: PumpId) {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, true);

    let report = c.tick(Some(&Measurement::new(ph, 20.0, 0)));
    match report.decision {
        Some(DoseDecision::BelowMinimum { pump: p, volume_ml }) => {
            assert_eq!(p, pump);
            assert!(volume_ml < 5.0);
        }
        other => panic!("expected BelowMinimum, got {other:?}"),
    }
    assert_eq!(c.state().pump(pump), PumpState::Idle);
    assert_eq!(c.engine().record(pump).controller.doses_this_hour, 0);
}

#[rstest]
#[case(3.5, 20.0, "ph")]
#[case(9.5, 20.0, "ph")]
#[case(7.0, 2.0, "volume_liters")]
#[case(3.0, 500.0, "volume_liters")]
fn out_of_range_measurements_are_rejected(
    #[case] ph: f32,
    #[case] volume: f32,
    #[case] field: &str,
) {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, true);

    let report = c.tick(Some(&Measurement::new(ph, volume, 0)));
    match report.decision {
        Some(DoseDecision::Rejected(CoreError::InvalidMeasurement { field: f, .. })) => {
            assert_eq!(f, field);
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
    assert!(PumpId::ALL.iter().all(|p| !c.is_running(*p)));
    assert_eq!(c.state().device(), DeviceState::Monitoring);
}

#[rstest]
fn measurements_are_ignored_with_auto_off() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    let report = c.tick(Some(&Measurement::new(7.5, 20.0, 0)));
    assert_eq!(report.decision, None);
    assert_eq!(c.state().pump(PumpId::PhDown), PumpState::Idle);
}

#[rstest]
fn second_dose_inside_spacing_is_blocked() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    c.manual_dose(PumpId::PhUp, 10.0).expect("first dose");
    c.stop_all();
    clock.advance_ms(100_000);

    let err = c.manual_dose(PumpId::PhUp, 10.0).expect_err("spacing");
    assert_eq!(
        err,
        CoreError::SafetyGateBlocked(GateBlock::IntervalNotElapsed {
            remaining_ms: 200_000
        })
    );
    assert!(!c.can_dose(PumpId::PhUp));
    // Other pumps keep their own spacing.
    assert!(c.can_dose(PumpId::PhDown));

    clock.advance_ms(200_000);
    assert!(c.can_dose(PumpId::PhUp));
}

#[rstest]
fn busy_pump_blocks_a_new_dose() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    c.manual_dose(PumpId::PhDown, 6.0).expect("dose");
    let err = c.manual_dose(PumpId::PhDown, 6.0).expect_err("busy");
    assert_eq!(
        err,
        CoreError::SafetyGateBlocked(GateBlock::PumpBusy(PumpState::Priming))
    );
}

#[rstest]
fn hourly_quota_blocks_the_fourth_dose_until_the_window_rolls() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    for _ in 0..3 {
        c.manual_dose(PumpId::PhDown, 5.0).expect("dose within quota");
        c.stop_all();
        clock.advance_ms(300_000);
    }
    assert_eq!(clock_now(&c), 900_000);
    let err = c.manual_dose(PumpId::PhDown, 5.0).expect_err("quota");
    assert_eq!(
        err,
        CoreError::SafetyGateBlocked(GateBlock::HourlyQuotaReached { doses: 3 })
    );

    clock.set_ms(3_600_000);
    c.manual_dose(PumpId::PhDown, 5.0).expect("new window");
    assert_eq!(
        c.engine().record(PumpId::PhDown).controller.doses_this_hour,
        1
    );
}

fn clock_now(c: &Controller<Recorder>) -> u64 {
    c.now_ms()
}

#[rstest]
#[case(1.0, 5.0)]
#[case(12.5, 12.5)]
#[case(80.0, 25.0)]
fn manual_volume_is_clamped_to_dose_limits(#[case] asked: f32, #[case] applied: f32) {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    let plan = c.manual_dose(PumpId::NutrientA, asked).expect("dose");
    assert!((plan.volume_ml - applied).abs() < 1e-4);
    assert_eq!(plan.pump, PumpId::NutrientA);
}

#[rstest]
fn doses_are_refused_outside_monitoring() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    assert!(c.set_maintenance(true));
    let err = c.manual_dose(PumpId::PhUp, 10.0).expect_err("maintenance");
    assert_eq!(
        err,
        CoreError::SafetyGateBlocked(GateBlock::DeviceMode(DeviceState::Maintenance))
    );

    assert!(c.set_maintenance(false));
    assert!(c.manual_dose(PumpId::PhUp, 10.0).is_ok());
}

#[rstest]
fn manual_run_adds_delivered_volume_on_stop() {
    let clock = ManualClock::new();
    let (mut c, rec) = controller(&clock, false);

    let plan = c.start_manual(PumpId::NutrientA, 30.0).expect("manual run");
    assert!(plan.manual);
    assert_eq!(plan.run_ms, 600_000);
    assert_eq!(plan.duty, 92);

    c.tick(None);
    clock.advance_ms(2_500);
    c.tick(None);
    assert_eq!(c.state().pump(PumpId::NutrientA), PumpState::Dosing);
    assert_eq!(rec.last_for(2), Some(92));

    clock.advance_ms(60_000);
    let end = c.stop_manual(PumpId::NutrientA).expect("stop");
    assert_eq!(end, PumpState::CoolingDown);
    assert_eq!(rec.last_for(2), Some(0));
    assert!(!c.is_running(PumpId::NutrientA));
    assert!((c.total_dosed(PumpId::NutrientA) - 30.0).abs() < 1e-3);
}

#[rstest]
fn manual_rate_is_clamped_to_the_flow_range() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    let plan = c.start_manual(PumpId::NutrientB, 500.0).expect("manual run");
    assert!((plan.rate_ml_min - 90.0).abs() < f32::EPSILON);
    assert_eq!(plan.duty, 255);
}

#[rstest]
fn stop_manual_on_an_idle_pump_is_a_no_op() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    assert_eq!(c.stop_manual(PumpId::PhUp), Ok(PumpState::Idle));
}

#[rstest]
fn set_target_and_gains_are_clamped() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    assert!((c.set_target(9.5) - 8.0).abs() < f32::EPSILON);
    assert!((c.set_target(4.0) - 5.0).abs() < f32::EPSILON);
    assert!((c.set_target(6.4) - 6.4).abs() < f32::EPSILON);

    let g = c.set_pid(100.0, -1.0, 3.0);
    assert!((g.kp - 50.0).abs() < f32::EPSILON);
    assert!(g.ki.abs() < f32::EPSILON);
    assert!((g.kd - 3.0).abs() < f32::EPSILON);
    assert_eq!(c.pid(), g);
}

#[rstest]
fn reset_counters_clears_the_hour_window() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    c.manual_dose(PumpId::PhUp, 5.0).expect("dose");
    c.reset_counters();
    assert_eq!(c.engine().record(PumpId::PhUp).controller.doses_this_hour, 0);
    // Lifetime total survives a counter reset.
    assert!((c.total_dosed(PumpId::PhUp) - 5.0).abs() < 1e-4);
}

#[rstest]
#[case(f32::NAN, 0.5, 2.0)]
#[case(8.0, f32::INFINITY, 2.0)]
#[case(8.0, 0.5, f32::NEG_INFINITY)]
fn non_finite_gains_are_ignored(#[case] kp: f32, #[case] ki: f32, #[case] kd: f32) {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, true);

    let g = c.set_pid(kp, ki, kd);
    assert!(g.kp.is_finite() && g.ki.is_finite() && g.kd.is_finite());
    assert_eq!((g.kp, g.ki, g.kd), (8.0, 0.5, 2.0));

    let report = c.tick(Some(&Measurement::new(7.0, 20.0, 0)));
    match report.decision {
        Some(DoseDecision::Started(plan)) => {
            assert!((5.0..=25.0).contains(&plan.volume_ml), "{}", plan.volume_ml);
            assert_eq!(plan.run_ms, 42_000);
        }
        other => panic!("expected Started, got {other:?}"),
    }
    assert!((c.total_dosed(PumpId::PhDown) - 21.0).abs() < 1e-4);
}

#[rstest]
fn hour_windows_roll_independently_per_pump() {
    let clock = ManualClock::new();
    let (mut c, _rec) = controller(&clock, false);

    c.manual_dose(PumpId::PhUp, 5.0).expect("up dose");
    c.stop_all();
    clock.set_ms(1_800_000);
    c.manual_dose(PumpId::PhDown, 5.0).expect("down dose");
    c.stop_all();

    let up = |c: &Controller<Recorder>| c.engine().record(PumpId::PhUp).controller.clone();
    let down = |c: &Controller<Recorder>| c.engine().record(PumpId::PhDown).controller.clone();
    assert_eq!(up(&c).hour_start_ms, 0);
    assert_eq!(down(&c).hour_start_ms, 0);

    // Both windows opened at boot; only the pump that doses past the hour rolls.
    clock.set_ms(3_600_000);
    c.manual_dose(PumpId::PhDown, 5.0).expect("down dose in a new window");
    c.stop_all();
    assert_eq!(down(&c).hour_start_ms, 3_600_000);
    assert_eq!(down(&c).doses_this_hour, 1);
    assert_eq!(up(&c).hour_start_ms, 0, "other pump's window untouched");
    assert_eq!(up(&c).doses_this_hour, 1);

    // PhUp rolls on its own schedule; PhDown keeps its count and start.
    clock.set_ms(4_000_000);
    c.manual_dose(PumpId::PhUp, 5.0).expect("up dose in a new window");
    c.stop_all();
    assert_eq!(up(&c).hour_start_ms, 4_000_000);
    assert_eq!(up(&c).doses_this_hour, 1);
    assert_eq!(down(&c).hour_start_ms, 3_600_000);
    assert_eq!(down(&c).doses_this_hour, 1);

    // Inside PhDown's window a second dose counts without a reset.
    clock.set_ms(7_100_000);
    c.manual_dose(PumpId::PhDown, 5.0).expect("second down dose");
    assert_eq!(down(&c).hour_start_ms, 3_600_000);
    assert_eq!(down(&c).doses_this_hour, 2);
    assert_eq!(up(&c).hour_start_ms, 4_000_000);
}
