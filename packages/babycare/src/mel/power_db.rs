//! Power → decibel conversion with top-dB clipping.
//!
//! `10 * log10(|p|)` for every magnitude above [`AMIN`], [`FLOOR_DB`]
//! otherwise; afterwards everything below `max - TOP_DB` is lifted to
//! `max - TOP_DB`. No reference level is applied.

use crate::constants::{AMIN, FLOOR_DB, TOP_DB};

/// Convert `values` in place and return the matrix maximum (in dB).
///
/// Non-finite inputs are treated like sub-[`AMIN`] magnitudes, so the
/// output is always finite.
pub fn power_to_db(values: &mut [f32]) -> f32 {
    let mut max_db = f32::NEG_INFINITY;
    for v in values.iter_mut() {
        let magnitude = v.abs();
        *v = if magnitude.is_finite() && magnitude > AMIN {
            10.0 * magnitude.log10()
        } else {
            FLOOR_DB
        };
        if *v > max_db {
            max_db = *v;
        }
    }

    let lowest = max_db - TOP_DB;
    for v in values.iter_mut() {
        if *v < lowest {
            *v = lowest;
        }
    }
    max_db
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn converts_and_clips_to_80_db() {
        let mut m = vec![1.0, 1e-3, 1e-12, 0.0, 1e-9, 100.0];
        let max = power_to_db(&mut m);

        assert_abs_diff_eq!(max, 20.0, epsilon = 1e-4);
        assert_abs_diff_eq!(m[0], 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(m[1], -30.0, epsilon = 1e-4);
        // floored and very quiet values all end up at max - 80
        for &v in &m[2..5] {
            assert_abs_diff_eq!(v, -60.0, epsilon = 1e-4);
        }
        assert_abs_diff_eq!(m[5], 20.0, epsilon = 1e-4);
    }

    #[test]
    fn all_silent_matrix_sits_on_the_floor() {
        let mut m = vec![0.0; 16];
        let max = power_to_db(&mut m);
        assert_eq!(max, FLOOR_DB);
        assert!(m.iter().all(|&v| v == FLOOR_DB));
    }

    #[test]
    fn negative_power_uses_magnitude() {
        let mut m = vec![-10.0, 10.0];
        power_to_db(&mut m);
        assert_abs_diff_eq!(m[0], 10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(m[1], 10.0, epsilon = 1e-4);
    }

    #[test]
    fn non_finite_values_are_floored() {
        let mut m = vec![f32::NAN, f32::INFINITY, 1.0];
        power_to_db(&mut m);
        assert!(m.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(m[0], -80.0, epsilon = 1e-4);
    }
}
