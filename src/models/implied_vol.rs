use crate::errors::PricerResult;
use crate::models::black_scholes::{black_scholes_price, require_positive};
use crate::models::OptionKind;

/// Volatility search bracket: 0.1% to 1000% annualized.
pub const SIGMA_LOWER: f64 = 0.001;
pub const SIGMA_UPPER: f64 = 10.0;

/// Iteration cap for the volatility search. Doubles as the only timeout.
pub const MAX_ITERATIONS: u32 = 100;

/// Absolute tolerance on sigma.
pub const SIGMA_TOLERANCE: f64 = 2e-12;

/// Why a bracketing search gave up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RootFailure {
    /// f(a) and f(b) do not straddle zero (or one of them is not finite)
    NoBracket { fa: f64, fb: f64 },
    MaxIterations { iterations: u32 },
}

/// Brent's method: inverse quadratic interpolation and secant steps,
/// falling back to bisection whenever the interpolated step is not
/// trustworthy. Derivative free; converges for any continuous f with a
/// valid bracket.
#[derive(Debug, Clone, Copy)]
pub struct BrentSolver {
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for BrentSolver {
    fn default() -> Self {
        Self {
            tolerance: SIGMA_TOLERANCE,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

impl BrentSolver {
    pub fn new(tolerance: f64, max_iterations: u32) -> Self {
        Self { tolerance, max_iterations }
    }

    /// Find x in [lo, hi] with f(x) = 0. Requires f(lo), f(hi) of opposite sign.
    pub fn find_root<F>(&self, f: F, lo: f64, hi: f64) -> Result<f64, RootFailure>
    where
        F: Fn(f64) -> f64,
    {
        let mut a = lo;
        let mut b = hi;
        let mut fa = f(a);
        let mut fb = f(b);

        if !fa.is_finite() || !fb.is_finite() {
            return Err(RootFailure::NoBracket { fa, fb });
        }
        if fa == 0.0 {
            return Ok(a);
        }
        if fb == 0.0 {
            return Ok(b);
        }
        if fa.signum() == fb.signum() {
            return Err(RootFailure::NoBracket { fa, fb });
        }

        // c is the contrapoint: f(b) and f(c) always straddle the root
        let mut c = b;
        let mut fc = fb;
        let mut d = 0.0_f64;
        let mut e = 0.0_f64;

        for _ in 0..self.max_iterations {
            if fb.signum() == fc.signum() {
                c = a;
                fc = fa;
                d = b - a;
                e = d;
            }
            // Keep b as the best estimate
            if fc.abs() < fb.abs() {
                a = b;
                b = c;
                c = a;
                fa = fb;
                fb = fc;
                fc = fa;
            }

            let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * self.tolerance;
            let m = 0.5 * (c - b);
            if m.abs() <= tol || fb == 0.0 {
                return Ok(b);
            }

            if e.abs() >= tol && fa.abs() > fb.abs() {
                let s = fb / fa;
                let (mut p, mut q) = if a == c {
                    // Secant
                    (2.0 * m * s, 1.0 - s)
                } else {
                    // Inverse quadratic interpolation
                    let q0 = fa / fc;
                    let r = fb / fc;
                    (
                        s * (2.0 * m * q0 * (q0 - r) - (b - a) * (r - 1.0)),
                        (q0 - 1.0) * (r - 1.0) * (s - 1.0),
                    )
                };
                if p > 0.0 {
                    q = -q;
                }
                p = p.abs();

                let min1 = 3.0 * m * q - (tol * q).abs();
                let min2 = (e * q).abs();
                if 2.0 * p < min1.min(min2) {
                    e = d;
                    d = p / q;
                } else {
                    d = m;
                    e = d;
                }
            } else {
                d = m;
                e = d;
            }

            a = b;
            fa = fb;
            b += if d.abs() > tol { d } else { tol.copysign(m) };
            fb = f(b);
        }

        Err(RootFailure::MaxIterations {
            iterations: self.max_iterations,
        })
    }
}

/// Implied volatility by inverting Black-Scholes on [0.001, 10.0].
///
/// Returns `Ok(NaN)` when no volatility in the bracket reproduces `price`
/// (deep ITM/OTM quotes, prices below intrinsic or above the spot bound) or
/// the search runs out of iterations. NaN is the "undefined" sentinel and is
/// never coerced to zero. Non-positive spot, strike or time is an error.
pub fn implied_volatility(
    price: f64,
    spot: f64,
    strike: f64,
    t: f64,
    rate: f64,
    kind: OptionKind,
) -> PricerResult<f64> {
    require_positive("spot", spot)?;
    require_positive("strike", strike)?;
    require_positive("time_to_expiry", t)?;
    // Validates rate through the pricer
    black_scholes_price(spot, strike, rate, t, SIGMA_LOWER, kind)?;

    if !price.is_finite() {
        return Ok(f64::NAN);
    }

    let price_error = |sigma: f64| {
        black_scholes_price(spot, strike, rate, t, sigma, kind)
            .map(|p| p - price)
            .unwrap_or(f64::NAN)
    };

    match BrentSolver::default().find_root(price_error, SIGMA_LOWER, SIGMA_UPPER) {
        Ok(sigma) => Ok(sigma),
        Err(failure) => {
            tracing::debug!(?failure, price, spot, strike, t, "implied volatility undefined");
            Ok(f64::NAN)
        }
    }
}
