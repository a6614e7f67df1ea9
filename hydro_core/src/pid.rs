//! Per-pump feedback law and dose bookkeeping.

/// PID gain coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl Gains {
    /// Clamp each gain to the range an operator may tune it within.
    pub fn clamped(self) -> Self {
        Self {
            kp: self.kp.clamp(0.1, 50.0),
            ki: self.ki.clamp(0.0, 5.0),
            kd: self.kd.clamp(0.0, 10.0),
        }
    }

    /// Replace any non-finite gain with the one from `previous`.
    pub fn or_previous(self, previous: Gains) -> Self {
        let pick = |v: f32, old: f32| if v.is_finite() { v } else { old };
        Self {
            kp: pick(self.kp, previous.kp),
            ki: pick(self.ki, previous.ki),
            kd: pick(self.kd, previous.kd),
        }
    }
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            kp: 8.0,
            ki: 0.5,
            kd: 2.0,
        }
    }
}

/// Terms of one controller update, kept for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidTerms {
    pub error: f32,
    pub integral: f32,
    pub derivative: f32,
    pub output: f32,
}

#[derive(Debug, Clone)]
pub struct DoseController {
    pub gains: Gains,
    pub setpoint: f32,
    pub integral: f32,
    pub integral_limit: f32,
    pub last_error: f32,
    /// Clock time of the last accepted dose; `None` if the pump never dosed.
    pub last_dose_ms: Option<u64>,
    pub doses_this_hour: u32,
    pub hour_start_ms: u64,
    pub total_dosed_ml: f32,
}

impl DoseController {
    pub fn new(gains: Gains, setpoint: f32, integral_limit: f32, now_ms: u64) -> Self {
        Self {
            gains,
            setpoint,
            integral: 0.0,
            integral_limit,
            last_error: 0.0,
            last_dose_ms: None,
            doses_this_hour: 0,
            hour_start_ms: now_ms,
            total_dosed_ml: 0.0,
        }
    }

    /// Advance the controller with a new process value.
    ///
    /// error = setpoint - current; the integral is clamped to
    /// `±integral_limit`; derivative = error - previous error.
    pub fn update(&mut self, current: f32) -> PidTerms {
        let error = self.setpoint - current;
        self.integral = (self.integral + error).clamp(-self.integral_limit, self.integral_limit);
        let derivative = error - self.last_error;
        self.last_error = error;
        let output =
            self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative;
        PidTerms {
            error,
            integral: self.integral,
            derivative,
            output,
        }
    }

    /// Drop accumulated integral and derivative history.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
    }

    /// Restart the hour window once it has fully elapsed.
    pub fn roll_hour_window(&mut self, now_ms: u64, window_ms: u64) {
        if now_ms.saturating_sub(self.hour_start_ms) >= window_ms {
            self.doses_this_hour = 0;
            self.hour_start_ms = now_ms;
        }
    }

    /// Time left before the minimum spacing since the last dose is met.
    pub fn interval_remaining(&self, now_ms: u64, min_interval_ms: u64) -> u64 {
        match self.last_dose_ms {
            Some(t) => min_interval_ms.saturating_sub(now_ms.saturating_sub(t)),
            None => 0,
        }
    }

    /// Bookkeeping at dose acceptance.
    pub fn record_dose(&mut self, now_ms: u64, volume_ml: f32) {
        self.last_dose_ms = Some(now_ms);
        self.doses_this_hour = self.doses_this_hour.saturating_add(1);
        self.total_dosed_ml += volume_ml;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl(setpoint: f32) -> DoseController {
        DoseController::new(Gains::default(), setpoint, 50.0, 0)
    }

    #[test]
    fn first_update_matches_hand_computation() {
        let mut c = ctrl(6.0);
        let t = c.update(7.0);
        assert!((t.error + 1.0).abs() < 1e-6);
        assert!((t.integral + 1.0).abs() < 1e-6);
        assert!((t.derivative + 1.0).abs() < 1e-6);
        assert!((t.output + 10.5).abs() < 1e-5);
    }

    #[test]
    fn integral_is_bounded() {
        let mut c = ctrl(9.0);
        for _ in 0..100 {
            c.update(4.0);
        }
        assert_eq!(c.integral, 50.0);
        c.setpoint = 4.0;
        for _ in 0..100 {
            c.update(9.0);
        }
        assert_eq!(c.integral, -50.0);
    }

    #[test]
    fn reset_clears_history() {
        let mut c = ctrl(6.0);
        c.update(7.0);
        c.reset();
        assert_eq!((c.integral, c.last_error), (0.0, 0.0));
    }

    #[test]
    fn hour_window_rolls_only_after_full_window() {
        let mut c = ctrl(6.0);
        c.record_dose(10, 5.0);
        c.record_dose(20, 5.0);
        c.roll_hour_window(3_599_999, 3_600_000);
        assert_eq!(c.doses_this_hour, 2);
        c.roll_hour_window(3_600_000, 3_600_000);
        assert_eq!(c.doses_this_hour, 0);
        assert_eq!(c.hour_start_ms, 3_600_000);
        assert!((c.total_dosed_ml - 10.0).abs() < 1e-6);
    }

    #[test]
    fn never_dosed_pump_has_no_interval_remaining() {
        let mut c = ctrl(6.0);
        assert_eq!(c.interval_remaining(0, 300_000), 0);
        c.record_dose(1_000, 5.0);
        assert_eq!(c.interval_remaining(101_000, 300_000), 200_000);
        assert_eq!(c.interval_remaining(301_000, 300_000), 0);
    }

    #[test]
    fn gains_clamp_to_tuning_range() {
        let g = Gains {
            kp: 100.0,
            ki: -1.0,
            kd: 20.0,
        }
        .clamped();
        assert_eq!((g.kp, g.ki, g.kd), (50.0, 0.0, 10.0));
    }

    #[test]
    fn non_finite_gains_keep_the_previous_value() {
        let g = Gains {
            kp: f32::NAN,
            ki: f32::INFINITY,
            kd: 1.5,
        }
        .or_previous(Gains::default())
        .clamped();
        assert_eq!((g.kp, g.ki, g.kd), (8.0, 0.5, 1.5));
    }
}
