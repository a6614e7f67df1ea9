use rppal::gpio::{Gpio, OutputPin};

use crate::error::{HwError, Result};

/// Software PWM on GPIO output pins, one pin per actuator channel.
///
/// Duty 0 clears PWM and drives the pin low; any other duty runs PWM at
/// `duty / 255` of the configured frequency period.
pub struct PwmActuator {
    outputs: Vec<(u8, OutputPin)>,
    frequency_hz: f64,
}

impl PwmActuator {
    /// `pins` maps actuator channel to BCM GPIO number.
    pub fn try_new(pins: &[(u8, u8)], frequency_hz: f64) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut outputs = Vec::with_capacity(pins.len());
        for &(channel, bcm) in pins {
            let mut pin = gpio
                .get(bcm)
                .map_err(|e| HwError::Gpio(format!("pin {bcm}: {e}")))?
                .into_output_low();
            pin.set_reset_on_drop(true);
            tracing::debug!(channel, pin = bcm, "pwm output ready");
            outputs.push((channel, pin));
        }
        Ok(Self {
            outputs,
            frequency_hz,
        })
    }

    fn apply(&mut self, channel: u8, duty: u8) -> Result<()> {
        let hz = self.frequency_hz;
        let (_, pin) = self
            .outputs
            .iter_mut()
            .find(|(c, _)| *c == channel)
            .ok_or(HwError::UnknownChannel(channel))?;
        if duty == 0 {
            pin.clear_pwm().map_err(|e| HwError::Gpio(e.to_string()))?;
            pin.set_low();
            return Ok(());
        }
        pin.set_pwm_frequency(hz, f64::from(duty) / 255.0)
            .map_err(|e| HwError::Gpio(e.to_string()))
    }
}

impl hydro_traits::Actuator for PwmActuator {
    fn set_duty(
        &mut self,
        channel: u8,
        duty: u8,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.apply(channel, duty).map_err(|e| {
            tracing::error!(channel, duty, error = %e, "pwm write failed");
            Box::new(e) as Box<dyn std::error::Error + Send + Sync>
        })
    }
}

impl Drop for PwmActuator {
    fn drop(&mut self) {
        for (_, pin) in &mut self.outputs {
            let _ = pin.clear_pwm();
            pin.set_low();
        }
    }
}
