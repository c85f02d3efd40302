//! Analog value shaping: normalization, deadzone, expo and gain.
//!
//! All functions are pure and operate on normalized positions in [-1, 1].
//! Fixed points: shaping maps 0 to 0 and ±1 to ±gain for every parameter
//! choice, and is monotonic in between.

use crate::preset::Shaping;

/// Normalizes an ABS sample against its device-declared range, clamped to
/// [-1, 1].
pub fn normalize_abs(raw: i32, min: i32, max: i32) -> f64 {
    if max <= min {
        return 0.0;
    }
    let x = 2.0 * (f64::from(raw) - f64::from(min)) / (f64::from(max) - f64::from(min)) - 1.0;
    x.clamp(-1.0, 1.0)
}

/// Normalizes a REL delta against the configured speed cutoff.
pub fn normalize_rel(raw: i32, cutoff: f64) -> f64 {
    if cutoff <= 0.0 {
        return 0.0;
    }
    (f64::from(raw) / cutoff).clamp(-1.0, 1.0)
}

/// Zero inside the deadzone (inclusive of the edge), rescaled so the
/// remaining band still spans the full [-1, 1].
pub fn apply_deadzone(x: f64, deadzone: f64) -> f64 {
    let deadzone = deadzone.clamp(0.0, 0.999_999);
    if x.abs() <= deadzone {
        return 0.0;
    }
    x.signum() * (x.abs() - deadzone) / (1.0 - deadzone)
}

/// Expo curve. `e = 0` is the identity; positive `e` flattens the center
/// response, negative `e` is the odd-mirrored functional inverse of the
/// same curve, so the two directions are symmetric around the identity.
pub fn expo(x: f64, e: f64) -> f64 {
    let e = e.clamp(-0.999_999, 0.999_999);
    let sign = x.signum();
    let a = x.abs().clamp(0.0, 1.0);
    if e >= 0.0 {
        sign * a * ((1.0 - a) * e + 1.0)
    } else {
        // Inverse of y = a·((1-a)k + 1) for k = -e, solved for a.
        let k = -e;
        let disc = ((k + 1.0) * (k + 1.0) - 4.0 * k * a).max(0.0);
        sign * ((k + 1.0) - disc.sqrt()) / (2.0 * k)
    }
}

/// The full chain: deadzone, expo, gain.
pub fn shape(x: f64, s: &Shaping) -> f64 {
    s.gain * expo(apply_deadzone(x, s.deadzone), s.expo)
}

/// Maps a shaped value back to a target axis range, saturating at the
/// boundaries.
pub fn denormalize_abs(y: f64, min: i32, max: i32) -> i32 {
    let min_f = f64::from(min);
    let max_f = f64::from(max);
    let center = (min_f + max_f) / 2.0;
    let half = (max_f - min_f) / 2.0;
    (center + y.clamp(-1.0, 1.0) * half).round() as i32
}

/// Fractional remainder carried between REL ticks so rounding does not
/// bias long motions.
#[derive(Debug, Default, Clone, Copy)]
pub struct FractionalCarry {
    carry: f64,
}

impl FractionalCarry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a fractional amount, returning the whole part to emit.
    pub fn take(&mut self, value: f64) -> i32 {
        self.carry += value;
        let whole = self.carry.trunc();
        self.carry -= whole;
        whole as i32
    }

    pub fn reset(&mut self) {
        self.carry = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaping(deadzone: f64, gain: f64, expo: f64) -> Shaping {
        Shaping {
            deadzone,
            gain,
            expo,
            rel_rate: 60,
            rel_to_abs_input_cutoff: 100.0,
            release_timeout_ms: 50,
        }
    }

    #[test]
    fn abs_normalization_spans_the_range() {
        assert_eq!(normalize_abs(0, 0, 255), -1.0);
        assert_eq!(normalize_abs(255, 0, 255), 1.0);
        assert!((normalize_abs(128, 0, 255) - 0.003_921).abs() < 1e-3);
        assert_eq!(normalize_abs(-40000, -32768, 32767), -1.0);
        assert_eq!(normalize_abs(5, 5, 5), 0.0);
    }

    #[test]
    fn deadzone_edge_is_zero() {
        assert_eq!(apply_deadzone(0.1, 0.1), 0.0);
        assert_eq!(apply_deadzone(0.099, 0.1), 0.0);
        assert!(apply_deadzone(0.101, 0.1) > 0.0);
        // The remaining band is rescaled to the full range.
        assert!((apply_deadzone(1.0, 0.1) - 1.0).abs() < 1e-12);
        assert!((apply_deadzone(-1.0, 0.1) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn expo_fixed_points() {
        for e in [-0.9, -0.5, 0.0, 0.5, 0.9] {
            assert_eq!(expo(0.0, e), 0.0, "expo({e}) at 0");
            assert!((expo(1.0, e) - 1.0).abs() < 1e-9, "expo({e}) at 1");
            assert!((expo(-1.0, e) + 1.0).abs() < 1e-9, "expo({e}) at -1");
        }
    }

    #[test]
    fn expo_is_identity_at_zero() {
        for x in [-1.0, -0.7, -0.2, 0.0, 0.3, 0.8, 1.0] {
            assert!((expo(x, 0.0) - x).abs() < 1e-12);
        }
    }

    #[test]
    fn expo_directions_are_inverses() {
        for x in [0.1, 0.25, 0.5, 0.75, 0.9] {
            for e in [0.3, 0.6, 0.9] {
                let there = expo(x, e);
                let back = expo(there, -e);
                assert!(
                    (back - x).abs() < 1e-9,
                    "expo inverse failed at x={x} e={e}: {back}"
                );
            }
        }
    }

    #[test]
    fn expo_is_monotonic() {
        for e in [-0.9, -0.4, 0.0, 0.4, 0.9] {
            let mut prev = expo(-1.0, e);
            let mut x = -1.0 + 1e-3;
            while x <= 1.0 {
                let y = expo(x, e);
                assert!(y >= prev - 1e-12, "non-monotonic at x={x} e={e}");
                prev = y;
                x += 1e-3;
            }
        }
    }

    // Pinned samples so a future reference comparison has a baseline.
    #[test]
    fn expo_golden_samples() {
        assert!((expo(0.5, 0.5) - 0.625).abs() < 1e-9);
        assert!((expo(0.25, 1.0) - 0.437_5).abs() < 1e-5);
        assert!((expo(0.625, -0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn shape_saturates_at_gain() {
        let s = shaping(0.2, 2.5, 0.3);
        assert_eq!(shape(0.0, &s), 0.0);
        assert!((shape(1.0, &s) - 2.5).abs() < 1e-9);
        assert!((shape(-1.0, &s) + 2.5).abs() < 1e-9);
    }

    #[test]
    fn denormalization_saturates() {
        assert_eq!(denormalize_abs(0.0, -32768, 32767), 0);
        assert_eq!(denormalize_abs(1.0, -32768, 32767), 32767);
        assert_eq!(denormalize_abs(-1.0, -32768, 32767), -32768);
        assert_eq!(denormalize_abs(5.0, 0, 255), 255);
    }

    #[test]
    fn fractional_carry_has_no_bias() {
        let mut carry = FractionalCarry::new();
        let mut total = 0i64;
        for _ in 0..600 {
            total += i64::from(carry.take(0.4));
        }
        assert_eq!(total, 240);
    }
}
