use crate::errors::{PricerError, PricerResult};
use crate::models::OptionKind;
use statrs::distribution::{ContinuousCDF, Normal};

/// Black-Scholes European option price.
///
/// d1 = (ln(S/K) + (r + sigma^2/2)*T) / (sigma * sqrt(T))
/// d2 = d1 - sigma * sqrt(T)
///
/// call = S*Phi(d1) - K*e^(-rT)*Phi(d2)
/// put  = K*e^(-rT)*Phi(-d2) - S*Phi(-d1)
///
/// Pure function. Spot, strike, time and volatility must be positive.
pub fn black_scholes_price(
    spot: f64,
    strike: f64,
    rate: f64,
    t: f64,
    sigma: f64,
    kind: OptionKind,
) -> PricerResult<f64> {
    require_positive("spot", spot)?;
    require_positive("strike", strike)?;
    require_positive("time_to_expiry", t)?;
    require_positive("volatility", sigma)?;
    if !rate.is_finite() {
        return Err(PricerError::InvalidInput(format!("rate must be finite, got {rate}")));
    }

    let normal = Normal::standard();
    let sqrt_t = t.sqrt();
    let sigma_sqrt_t = sigma * sqrt_t;
    let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * t) / sigma_sqrt_t;
    let d2 = d1 - sigma_sqrt_t;
    let discounted_strike = strike * (-rate * t).exp();

    let price = match kind {
        OptionKind::Call => spot * normal.cdf(d1) - discounted_strike * normal.cdf(d2),
        OptionKind::Put => discounted_strike * normal.cdf(-d2) - spot * normal.cdf(-d1),
    };
    Ok(price)
}

/// Same as [`black_scholes_price`] but takes the kind as text, for callers
/// at the HTTP / storage boundary.
pub fn black_scholes_price_str(
    spot: f64,
    strike: f64,
    rate: f64,
    t: f64,
    sigma: f64,
    kind: &str,
) -> PricerResult<f64> {
    black_scholes_price(spot, strike, rate, t, sigma, kind.parse()?)
}

pub(crate) fn require_positive(name: &str, value: f64) -> PricerResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PricerError::InvalidInput(format!("{name} must be positive and finite, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_reference_value() {
        let c = black_scholes_price(100.0, 105.0, 0.05, 1.0, 0.2, OptionKind::Call).unwrap();
        assert!((c - 8.021).abs() < 1e-3, "call={c} should be ~8.021");
    }

    #[test]
    fn test_put_reference_value() {
        let p = black_scholes_price(100.0, 105.0, 0.05, 1.0, 0.2, OptionKind::Put).unwrap();
        assert!((p - 7.90).abs() < 1e-2, "put={p} should be ~7.90");
    }

    #[test]
    fn test_put_call_parity() {
        for &(s, k, r, t, sigma) in &[
            (100.0, 105.0, 0.05, 1.0, 0.2),
            (250.0, 180.0, 0.01, 0.1, 0.6),
            (42.0, 50.0, -0.005, 2.5, 0.35),
        ] {
            let c = black_scholes_price(s, k, r, t, sigma, OptionKind::Call).unwrap();
            let p = black_scholes_price(s, k, r, t, sigma, OptionKind::Put).unwrap();
            let parity = s - k * (-r * t).exp();
            assert!((c - p - parity).abs() < 1e-9, "parity broken: c-p={} vs {parity}", c - p);
        }
    }

    #[test]
    fn test_rejects_non_positive_inputs() {
        for (s, k, t, sigma) in [
            (0.0, 100.0, 1.0, 0.2),
            (100.0, -1.0, 1.0, 0.2),
            (100.0, 100.0, 0.0, 0.2),
            (100.0, 100.0, 1.0, 0.0),
            (f64::NAN, 100.0, 1.0, 0.2),
        ] {
            let res = black_scholes_price(s, k, 0.05, t, sigma, OptionKind::Call);
            assert!(
                matches!(res, Err(PricerError::InvalidInput(_))),
                "({s},{k},{t},{sigma}) accepted"
            );
        }
    }

    #[test]
    fn test_string_kind_is_validated() {
        let res = black_scholes_price_str(100.0, 100.0, 0.05, 1.0, 0.2, "binary");
        assert!(matches!(res, Err(PricerError::InvalidOptionKind(_))));
        let c = black_scholes_price_str(100.0, 105.0, 0.05, 1.0, 0.2, "call").unwrap();
        assert!((c - 8.021).abs() < 1e-3);
    }
}
