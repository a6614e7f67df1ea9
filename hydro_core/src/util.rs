//! Time and unit helpers shared across the core.

/// Number of milliseconds in one minute.
pub const MILLIS_PER_MIN: u64 = 60_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Time needed to deliver `volume_ml` at `rate_ml_min`, capped at `ceiling_ms`.
///
/// A non-positive or non-finite rate yields the ceiling.
#[inline]
pub fn run_duration_ms(volume_ml: f32, rate_ml_min: f32, ceiling_ms: u64) -> u64 {
    if !(rate_ml_min.is_finite() && rate_ml_min > 0.0) {
        return ceiling_ms;
    }
    let ms = (f64::from(volume_ml.max(0.0)) / f64::from(rate_ml_min)) * MILLIS_PER_MIN as f64;
    if ms >= ceiling_ms as f64 {
        ceiling_ms
    } else {
        ms.round() as u64
    }
}

/// Volume delivered by running at `rate_ml_min` for `elapsed_ms`.
#[inline]
pub fn delivered_ml(rate_ml_min: f32, elapsed_ms: u64) -> f32 {
    (f64::from(rate_ml_min) * elapsed_ms as f64 / MILLIS_PER_MIN as f64) as f32
}

/// Milliseconds as seconds with one decimal, for human-facing output.
#[inline]
pub fn secs(ms: u64) -> f64 {
    ms as f64 / MILLIS_PER_SEC as f64
}
