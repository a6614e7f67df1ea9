pub mod clock;
pub mod measurement;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use measurement::Measurement;

/// Output stage driving one pump per channel with an 8-bit duty cycle.
///
/// Implementations are expected to be stateless from the controller's point
/// of view: the last accepted duty stays applied until the next call.
pub trait Actuator {
    fn set_duty(
        &mut self,
        channel: u8,
        duty: u8,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Source of validated reservoir measurements (pH, conductivity, volume).
pub trait Probe {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Measurement, Box<dyn std::error::Error + Send + Sync>>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn set_duty(
        &mut self,
        channel: u8,
        duty: u8,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_duty(channel, duty)
    }
}

impl<P: Probe + ?Sized> Probe for Box<P> {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Measurement, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(timeout)
    }
}
