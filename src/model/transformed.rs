//! Models fitted by linear least squares on log-transformed y values.
use super::polynomial::polyfit;
use super::{FitError, FitModel, FitOutcome, check_series};

fn log_series(y: &[f64]) -> Result<Vec<f64>, FitError> {
    if y.iter().any(|v| *v <= 0.0) {
        return Err(FitError::NonPositive);
    }
    Ok(y.iter().map(|v| v.ln()).collect())
}

/// y = amplitude * exp(rate * x)
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialModel;

impl FitModel for ExponentialModel {
    fn name(&self) -> &'static str {
        "exponential"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["amplitude", "rate"]
    }

    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FitOutcome, FitError> {
        check_series(self, x, y)?;
        let coeffs = polyfit(x, &log_series(y)?, 1)?;
        let amplitude = coeffs[0].exp();
        let rate = coeffs[1];
        FitOutcome::evaluate(self, x, y, vec![amplitude, rate], |xi| amplitude * (rate * xi).exp())
    }
}

/// y = amplitude * exp(-(x - center)^2 / (2 * sigma^2))
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianModel;

impl FitModel for GaussianModel {
    fn name(&self) -> &'static str {
        "gaussian"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["amplitude", "center", "sigma"]
    }

    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FitOutcome, FitError> {
        check_series(self, x, y)?;
        let coeffs = polyfit(x, &log_series(y)?, 2)?;
        let (c0, c1, c2) = (coeffs[0], coeffs[1], coeffs[2]);
        if c2 >= 0.0 {
            return Err(FitError::Invalid("series has no peak".to_string()));
        }
        let sigma = (-1.0 / (2.0 * c2)).sqrt();
        let center = -c1 / (2.0 * c2);
        let amplitude = (c0 - c1 * c1 / (4.0 * c2)).exp();
        FitOutcome::evaluate(self, x, y, vec![amplitude, center, sigma], |xi| {
            amplitude * (-(xi - center).powi(2) / (2.0 * sigma * sigma)).exp()
        })
    }
}
