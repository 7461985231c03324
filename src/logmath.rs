use crate::error::DecoderError;

/// Floor for log-domain scores. Scores at or below this value are treated as
/// log(0), i.e. an impossible path.
pub const LOG_ZERO: f64 = -f64::MAX / 2.0;

/// log(1) in any base.
pub const LOG_ONE: f64 = 0.0;

/// Log-domain arithmetic in a configurable base.
///
/// All decoder scores are log-probabilities in this base; addition in the
/// log domain corresponds to multiplying probabilities. The base is carried
/// explicitly by the decoder context rather than held in process-wide state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogMath {
    base: f64,
    /// ln(base), cached for base conversions.
    natural_log_of_base: f64,
}

impl Default for LogMath {
    fn default() -> Self {
        Self {
            base: std::f64::consts::E,
            natural_log_of_base: 1.0,
        }
    }
}

impl LogMath {
    pub fn new(base: f64) -> Result<Self, DecoderError> {
        if !base.is_finite() || base <= 1.0 {
            return Err(DecoderError::config(format!(
                "log_base must be a finite value greater than 1.0, got {base}"
            )));
        }
        Ok(Self {
            base,
            natural_log_of_base: base.ln(),
        })
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    /// Adds two log-domain values as if they were linear probabilities:
    /// `log(base^a + base^b)`, computed without leaving the log domain.
    ///
    /// NaN inputs and NaN results collapse to [`LOG_ZERO`] so that a single
    /// corrupted score cannot poison a whole forward/backward pass.
    pub fn add_as_linear(&self, a: f64, b: f64) -> f64 {
        if a.is_nan() || b.is_nan() {
            tracing::warn!(a, b, "log add received NaN, treating as log zero");
            return LOG_ZERO;
        }
        if a <= LOG_ZERO {
            return b;
        }
        if b <= LOG_ZERO {
            return a;
        }
        let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
        // max + log_base(1 + base^(lo - hi)), via natural logs.
        let sum = hi + ((lo - hi) * self.natural_log_of_base).exp().ln_1p() / self.natural_log_of_base;
        if sum.is_nan() {
            tracing::warn!(a, b, "log add underflowed to NaN, treating as log zero");
            LOG_ZERO
        } else {
            sum
        }
    }

    pub fn linear_to_log(&self, linear: f64) -> f64 {
        if linear <= 0.0 {
            LOG_ZERO
        } else {
            linear.ln() / self.natural_log_of_base
        }
    }

    pub fn log_to_linear(&self, log: f64) -> f64 {
        if log <= LOG_ZERO {
            0.0
        } else {
            (log * self.natural_log_of_base).exp()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_degenerate_bases() {
        assert!(LogMath::new(1.0).is_err());
        assert!(LogMath::new(0.0).is_err());
        assert!(LogMath::new(f64::NAN).is_err());
        assert!(LogMath::new(std::f64::consts::E).is_ok());
    }

    #[test]
    fn add_as_linear_matches_linear_sum() {
        let lm = LogMath::default();
        let a = 0.3f64.ln();
        let b = 0.2f64.ln();
        let sum = lm.add_as_linear(a, b);
        assert!((lm.log_to_linear(sum) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn add_as_linear_in_base_ten() {
        let lm = LogMath::new(10.0).unwrap();
        let a = 0.3f64.log10();
        let b = 0.2f64.log10();
        let sum = lm.add_as_linear(a, b);
        assert!((lm.log_to_linear(sum) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn log_zero_is_additive_identity() {
        let lm = LogMath::default();
        assert_eq!(lm.add_as_linear(LOG_ZERO, -2.5), -2.5);
        assert_eq!(lm.add_as_linear(-2.5, LOG_ZERO), -2.5);
    }

    #[test]
    fn nan_collapses_to_log_zero() {
        let lm = LogMath::default();
        assert_eq!(lm.add_as_linear(f64::NAN, -1.0), LOG_ZERO);
    }

    #[test]
    fn round_trips_linear_domain() {
        let lm = LogMath::new(1.0001).unwrap();
        let log = lm.linear_to_log(0.37);
        assert!((lm.log_to_linear(log) - 0.37).abs() < 1e-9);
        assert_eq!(lm.log_to_linear(LOG_ONE), 1.0);
        assert_eq!(lm.linear_to_log(0.0), LOG_ZERO);
    }
}
