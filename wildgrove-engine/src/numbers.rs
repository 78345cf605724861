//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

/// Convert a u32 draw into a ratio strictly inside [0, 1).
///
/// Uses the midpoint construction so that the full sample space maps onto the
/// open-ended unit interval without ever producing exactly 1.0.
#[must_use]
pub fn sample_to_unit(sample: u32) -> f64 {
    let denom = f64::from(u32::MAX) + 1.0;
    ((f64::from(sample) + 0.5) / denom).clamp(0.0, 1.0 - f64::EPSILON)
}

/// Convert u32 to f64 while allowing the cast in a single location.
#[must_use]
pub fn u32_to_f64(value: u32) -> f64 {
    cast::<u32, f64>(value).unwrap_or(0.0)
}
