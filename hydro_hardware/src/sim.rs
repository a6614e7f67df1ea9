use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use hydro_traits::{Actuator, Clock, Measurement, Probe};

use crate::error::HwError;

/// pH shift per millilitre of adjuster per litre of reservoir.
const PH_SHIFT_PER_ML_PER_L: f32 = 0.4;
/// Conductivity gain (mS/cm) per millilitre of nutrient per litre.
const EC_GAIN_PER_ML_PER_L: f32 = 0.02;
/// Flow at full duty; flow scales linearly with duty below that.
const FULL_DUTY_ML_MIN: f32 = 90.0;

/// Channel layout the water model uses to decide what a pump does.
#[derive(Debug, Clone, Copy)]
pub struct ChannelMap {
    pub ph_up: u8,
    pub ph_down: u8,
    pub nutrient_a: u8,
    pub nutrient_b: u8,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            ph_up: 0,
            ph_down: 1,
            nutrient_a: 2,
            nutrient_b: 3,
        }
    }
}

struct Water {
    clock: Box<dyn Clock>,
    channels: ChannelMap,
    ph: f32,
    conductivity: f32,
    volume_liters: f32,
    temperature: f32,
    /// pH units per hour the water creeps upward on its own
    drift_per_hour: f32,
    duty: [u8; 256],
    delivered_ml: [f32; 256],
    last_update_ms: u64,
    fail_reads: u32,
    invalid_reads: u32,
}

impl Water {
    /// Integrate flow and drift up to the current clock reading.
    fn advance(&mut self) {
        let now = self.clock.now_ms();
        let dt_ms = now.saturating_sub(self.last_update_ms);
        self.last_update_ms = now;
        if dt_ms == 0 {
            return;
        }
        let dt_min = dt_ms as f32 / 60_000.0;
        self.ph += self.drift_per_hour * dt_min / 60.0;

        let vol = self.volume_liters.max(1.0);
        for ch in 0..=255u8 {
            let duty = self.duty[ch as usize];
            if duty == 0 {
                continue;
            }
            let ml = f32::from(duty) / 255.0 * FULL_DUTY_ML_MIN * dt_min;
            self.delivered_ml[ch as usize] += ml;
            self.volume_liters += ml / 1000.0;
            let per_l = ml / vol;
            if ch == self.channels.ph_up {
                self.ph += PH_SHIFT_PER_ML_PER_L * per_l;
            } else if ch == self.channels.ph_down {
                self.ph -= PH_SHIFT_PER_ML_PER_L * per_l;
            } else if ch == self.channels.nutrient_a || ch == self.channels.nutrient_b {
                self.conductivity += EC_GAIN_PER_ML_PER_L * per_l;
            }
        }
        self.ph = self.ph.clamp(0.0, 14.0);
    }
}

/// Simulated reservoir. Hand out an actuator and a probe that share the same water.
#[derive(Clone)]
pub struct SimulatedReservoir {
    water: Rc<RefCell<Water>>,
}

impl SimulatedReservoir {
    pub fn new<C: Clock + 'static>(clock: C, ph: f32, volume_liters: f32) -> Self {
        let now = clock.now_ms();
        Self {
            water: Rc::new(RefCell::new(Water {
                clock: Box::new(clock),
                channels: ChannelMap::default(),
                ph,
                conductivity: 1.2,
                volume_liters,
                temperature: 22.0,
                drift_per_hour: 0.05,
                duty: [0; 256],
                delivered_ml: [0.0; 256],
                last_update_ms: now,
                fail_reads: 0,
                invalid_reads: 0,
            })),
        }
    }

    pub fn with_channels(self, channels: ChannelMap) -> Self {
        self.water.borrow_mut().channels = channels;
        self
    }

    pub fn with_drift(self, drift_per_hour: f32) -> Self {
        self.water.borrow_mut().drift_per_hour = drift_per_hour;
        self
    }

    pub fn actuator(&self) -> SimulatedActuator {
        SimulatedActuator {
            water: Rc::clone(&self.water),
        }
    }

    pub fn probe(&self) -> SimulatedProbe {
        SimulatedProbe {
            water: Rc::clone(&self.water),
        }
    }

    pub fn ph(&self) -> f32 {
        let mut w = self.water.borrow_mut();
        w.advance();
        w.ph
    }

    pub fn duty(&self, channel: u8) -> u8 {
        self.water.borrow().duty[channel as usize]
    }

    pub fn delivered_ml(&self, channel: u8) -> f32 {
        let mut w = self.water.borrow_mut();
        w.advance();
        w.delivered_ml[channel as usize]
    }

    /// The next `n` probe reads fail with a timeout.
    pub fn fail_next_reads(&self, n: u32) {
        self.water.borrow_mut().fail_reads = n;
    }

    /// The next `n` probe reads return records flagged invalid.
    pub fn invalidate_next_reads(&self, n: u32) {
        self.water.borrow_mut().invalid_reads = n;
    }
}

pub struct SimulatedActuator {
    water: Rc<RefCell<Water>>,
}

impl Actuator for SimulatedActuator {
    fn set_duty(
        &mut self,
        channel: u8,
        duty: u8,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut w = self.water.borrow_mut();
        w.advance();
        if w.duty[channel as usize] != duty {
            tracing::trace!(channel, duty, "sim pump duty");
        }
        w.duty[channel as usize] = duty;
        Ok(())
    }
}

pub struct SimulatedProbe {
    water: Rc<RefCell<Water>>,
}

impl Probe for SimulatedProbe {
    fn read(
        &mut self,
        _timeout: Duration,
    ) -> Result<Measurement, Box<dyn std::error::Error + Send + Sync>> {
        let mut w = self.water.borrow_mut();
        w.advance();
        if w.fail_reads > 0 {
            w.fail_reads -= 1;
            return Err(Box::new(HwError::Timeout));
        }
        let now = w.clock.now_ms();
        if w.invalid_reads > 0 {
            w.invalid_reads -= 1;
            return Ok(Measurement::invalid(now));
        }
        Ok(Measurement {
            ph: w.ph,
            conductivity: w.conductivity,
            volume_liters: w.volume_liters,
            temperature: w.temperature,
            timestamp: now,
            valid: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_traits::ManualClock;

    #[test]
    fn idle_reservoir_only_drifts() {
        let clock = ManualClock::new();
        let res = SimulatedReservoir::new(clock.clone(), 6.0, 20.0).with_drift(0.6);
        clock.advance_ms(3_600_000);
        assert!((res.ph() - 6.6).abs() < 1e-3);
    }

    #[test]
    fn ph_down_lowers_ph_in_proportion_to_volume() {
        let clock = ManualClock::new();
        let res = SimulatedReservoir::new(clock.clone(), 7.0, 20.0).with_drift(0.0);
        let mut act = res.actuator();
        act.set_duty(1, 255).unwrap();
        // 90 ml/min for 20 s = 30 ml
        clock.advance_ms(20_000);
        act.set_duty(1, 0).unwrap();
        let ml = res.delivered_ml(1);
        assert!((ml - 30.0).abs() < 0.01, "delivered {ml}");
        assert!(res.ph() < 7.0);
        assert_eq!(res.duty(1), 0);
    }

    #[test]
    fn probe_reports_water_and_injected_faults() {
        let clock = ManualClock::starting_at(500);
        let res = SimulatedReservoir::new(clock.clone(), 6.4, 30.0);
        let mut probe = res.probe();
        let m = probe.read(Duration::from_millis(10)).unwrap();
        assert!(m.valid);
        assert_eq!(m.timestamp, 500);
        assert!((m.volume_liters - 30.0).abs() < 1e-6);

        res.fail_next_reads(1);
        assert!(probe.read(Duration::from_millis(10)).is_err());
        res.invalidate_next_reads(1);
        assert!(!probe.read(Duration::from_millis(10)).unwrap().valid);
        assert!(probe.read(Duration::from_millis(10)).unwrap().valid);
    }
}
