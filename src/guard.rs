//! Finiteness guards for values that flow into stats or storage.

use tracing::warn;

/// Return `value` if finite, otherwise zero (logged with `field`).
pub fn finite_or_zero(value: f64, field: &str) -> f64 {
    if value.is_finite() {
        value
    } else {
        warn!(field = field, value = %value, "Non-finite value clamped to zero");
        0.0
    }
}

/// Quiet variant for hot sampling paths where a log per call would flood.
pub fn finite(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_values_become_zero() {
        assert_eq!(finite_or_zero(f64::NAN, "x"), 0.0);
        assert_eq!(finite_or_zero(f64::INFINITY, "x"), 0.0);
        assert_eq!(finite_or_zero(f64::NEG_INFINITY, "x"), 0.0);
        assert_eq!(finite_or_zero(-2.5, "x"), -2.5);
        assert_eq!(finite(f64::NAN), 0.0);
    }
}
