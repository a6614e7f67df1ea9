use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic millisecond clock shared by the controller and its host loop.
///
/// - now_ms(): milliseconds since an implementation-defined epoch; never decreases
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an earlier reading
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `earlier_ms`, saturating at 0 on underflow.
    fn ms_since(&self, earlier_ms: u64) -> u64 {
        self.now_ms().saturating_sub(earlier_ms)
    }
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// now_ms() = offset
/// sleep(d) advances internal time by d without actually sleeping, which lets
/// a host loop fast-forward through hours of simulated operation.
///
/// Clones share the same time source.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    offset_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at an absolute millisecond value.
    pub fn starting_at(ms: u64) -> Self {
        let c = Self::new();
        c.set_ms(ms);
        c
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        self.advance_ms(d.as_millis() as u64);
    }

    pub fn advance_ms(&self, ms: u64) {
        let _ = self
            .offset_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_add(ms))
            });
    }

    /// Set the absolute time. Moving backwards is ignored to keep the clock monotonic.
    pub fn set_ms(&self, ms: u64) {
        self.offset_ms.fetch_max(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.offset_ms.load(Ordering::SeqCst)
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let c = ManualClock::new();
        assert_eq!(c.now_ms(), 0);
        c.sleep(Duration::from_millis(250));
        assert_eq!(c.now_ms(), 250);
        assert_eq!(c.ms_since(100), 150);
    }

    #[test]
    fn manual_clock_never_moves_backwards() {
        let c = ManualClock::starting_at(1_000);
        c.set_ms(10);
        assert_eq!(c.now_ms(), 1_000);
        assert_eq!(c.ms_since(5_000), 0);
    }

    #[test]
    fn clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance_ms(42);
        assert_eq!(b.now_ms(), 42);
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let c = MonotonicClock::new();
        let t0 = c.now_ms();
        c.sleep(Duration::from_millis(2));
        assert!(c.now_ms() >= t0);
    }
}
