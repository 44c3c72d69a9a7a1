//! Basis functions for the dose-response forms.
//!
//! - power: `g(x, n) = sign(x)·|x|^n`
//! - rational: `h(x, c) = x / (c − x)` for `x < c`
//!
//! Numerical notes:
//! - Unexposed strips often yield netOD slightly below zero. A plain `powf`
//!   returns NaN there for non-integer `n`, so the power basis is odd-extended.
//! - `h` has a pole at `x = c`. Callers keep `c` strictly above every netOD they
//!   evaluate; we return NaN at or beyond the pole so it cannot leak as a huge
//!   finite number.

/// Minimum distance from the rational pole treated as finite.
const POLE_EPS: f64 = 1e-12;

/// Odd-extended power `sign(x)·|x|^n`.
pub fn signed_pow(x: f64, n: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    x.abs().powf(n).copysign(x)
}

/// Derivative of `signed_pow` with respect to `x`: `n·|x|^(n-1)`.
pub fn signed_pow_slope(x: f64, n: f64) -> f64 {
    if x == 0.0 {
        return if n > 1.0 { 0.0 } else { f64::INFINITY };
    }
    n * x.abs().powf(n - 1.0)
}

/// Saturating basis `x / (c − x)`.
pub fn saturating(x: f64, c: f64) -> f64 {
    let gap = c - x;
    if gap <= POLE_EPS {
        return f64::NAN;
    }
    x / gap
}

/// Derivative of `saturating` with respect to `x`: `c / (c − x)²`.
pub fn saturating_slope(x: f64, c: f64) -> f64 {
    let gap = c - x;
    if gap <= POLE_EPS {
        return f64::NAN;
    }
    c / (gap * gap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_pow_is_finite_for_negative_netod() {
        let v = signed_pow(-0.01, 2.5);
        assert!(v.is_finite());
        assert!(v < 0.0);
        assert_eq!(signed_pow(0.0, 2.5), 0.0);
        assert!((signed_pow(0.5, 2.0) - 0.25).abs() < 1e-15);
    }

    #[test]
    fn slopes_match_finite_differences() {
        let h = 1e-6;
        for &x in &[0.05, 0.3, 0.8] {
            let fd = (signed_pow(x + h, 2.7) - signed_pow(x - h, 2.7)) / (2.0 * h);
            assert!((fd - signed_pow_slope(x, 2.7)).abs() < 1e-6);

            let fd = (saturating(x + h, 1.5) - saturating(x - h, 1.5)) / (2.0 * h);
            assert!((fd - saturating_slope(x, 1.5)).abs() < 1e-5);
        }
    }

    #[test]
    fn saturating_rejects_pole() {
        assert!(saturating(1.0, 1.0).is_nan());
        assert!(saturating(1.2, 1.0).is_nan());
        assert!(saturating(0.5, 1.0).is_finite());
    }
}
