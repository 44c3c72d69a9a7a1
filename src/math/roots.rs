//! Bounded root finding for monotone functions.
//!
//! Used to invert a fitted dose curve (`netOD → dose`) into its response
//! (`dose → netOD`). The search never leaves the supplied bracket: each
//! iteration tries a Newton step and falls back to bisection whenever the step
//! would leave the current bracket or the slope is unusable.

/// Iteration budget and convergence tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RootOptions {
    pub max_iter: usize,
    /// Absolute tolerance on both the bracket width and the residual.
    pub tol: f64,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-12,
        }
    }
}

/// Why a root could not be found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RootFailure {
    /// `f(lo) - target` and `f(hi) - target` have the same sign.
    NotBracketed,
    /// Iteration budget exhausted; carries the last iterate.
    NoConvergence { last: f64 },
}

/// Solve `f(x) = target` for `x ∈ [lo, hi]`.
pub fn solve_bracketed<F, G>(
    f: F,
    slope: G,
    target: f64,
    lo: f64,
    hi: f64,
    opts: RootOptions,
) -> Result<f64, RootFailure>
where
    F: Fn(f64) -> f64,
    G: Fn(f64) -> f64,
{
    let (mut lo, mut hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let f_lo = f(lo) - target;
    let f_hi = f(hi) - target;
    if !(f_lo.is_finite() && f_hi.is_finite()) {
        return Err(RootFailure::NotBracketed);
    }
    if f_lo == 0.0 {
        return Ok(lo);
    }
    if f_hi == 0.0 {
        return Ok(hi);
    }
    if f_lo.signum() == f_hi.signum() {
        return Err(RootFailure::NotBracketed);
    }
    let lo_sign = f_lo.signum();

    let mut x = 0.5 * (lo + hi);
    for _ in 0..opts.max_iter {
        let fx = f(x) - target;
        if !fx.is_finite() {
            return Err(RootFailure::NoConvergence { last: x });
        }
        if fx.abs() <= opts.tol || (hi - lo) <= opts.tol {
            return Ok(x);
        }

        if fx.signum() == lo_sign {
            lo = x;
        } else {
            hi = x;
        }

        let d = slope(x);
        let newton = if d.is_finite() && d != 0.0 { x - fx / d } else { f64::NAN };
        x = if newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }

    Err(RootFailure::NoConvergence { last: x })
}
