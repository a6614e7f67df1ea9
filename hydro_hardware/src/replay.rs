use std::time::Duration;

use hydro_traits::{Clock, Measurement, Probe};

use crate::error::HwError;

/// Probe that plays back recorded measurements in order.
///
/// Each read is stamped with the current clock reading. Once the recording is
/// exhausted the last measurement is repeated.
pub struct ReplayProbe<C: Clock> {
    rows: Vec<Measurement>,
    next: usize,
    clock: C,
}

impl<C: Clock> ReplayProbe<C> {
    pub fn new(rows: Vec<Measurement>, clock: C) -> Result<Self, HwError> {
        if rows.is_empty() {
            return Err(HwError::EmptyReplay);
        }
        Ok(Self {
            rows,
            next: 0,
            clock,
        })
    }

    /// Whether every recorded row has been returned at least once.
    pub fn exhausted(&self) -> bool {
        self.next >= self.rows.len()
    }
}

impl<C: Clock> Probe for ReplayProbe<C> {
    fn read(
        &mut self,
        _timeout: Duration,
    ) -> Result<Measurement, Box<dyn std::error::Error + Send + Sync>> {
        let idx = self.next.min(self.rows.len() - 1);
        self.next = self.next.saturating_add(1);
        let mut m = self.rows[idx];
        m.timestamp = self.clock.now_ms();
        tracing::trace!(row = idx, ph = m.ph, "replay sample");
        Ok(m)
    }
}
