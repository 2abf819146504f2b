use nalgebra::{DMatrix, DVector};

use super::{FitError, FitModel, FitOutcome, check_series};

const RANK_EPS: f64 = 1e-10;

/// Least-squares polynomial coefficients, lowest order first.
pub(crate) fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Vec<f64>, FitError> {
    let cols = degree + 1;
    if x.len() < cols {
        return Err(FitError::TooFewPoints { have: x.len(), need: cols });
    }
    // centre and scale x so higher powers stay well conditioned
    let (shift, scale) = normalisation(x);
    let design = DMatrix::from_fn(x.len(), cols, |i, j| ((x[i] - shift) / scale).powi(j as i32));
    let target = DVector::from_column_slice(y);

    let svd = design.svd(true, true);
    if svd.rank(RANK_EPS) < cols {
        return Err(FitError::Singular);
    }
    let solved = svd
        .solve(&target, RANK_EPS)
        .map_err(|e| FitError::Invalid(e.to_string()))?;

    Ok(unscale(solved.as_slice(), shift, scale))
}

fn normalisation(x: &[f64]) -> (f64, f64) {
    let min = x.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let shift = (min + max) / 2.0;
    let half_range = (max - min) / 2.0;
    let scale = if half_range > 0.0 { half_range } else { 1.0 };
    (shift, scale)
}

/// Expand coefficients of p((x - shift) / scale) back into powers of x.
fn unscale(coeffs: &[f64], shift: f64, scale: f64) -> Vec<f64> {
    let mut out = vec![0.0; coeffs.len()];
    for (k, c) in coeffs.iter().enumerate() {
        let factor = c / scale.powi(k as i32);
        // (x - shift)^k = sum_j C(k, j) x^j (-shift)^(k - j)
        let mut binom = 1.0;
        for j in 0..=k {
            out[j] += factor * binom * (-shift).powi((k - j) as i32);
            binom = binom * (k - j) as f64 / (j + 1) as f64;
        }
    }
    out
}

pub(crate) fn horner(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// y = c
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantModel;

impl FitModel for ConstantModel {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["c"]
    }

    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FitOutcome, FitError> {
        check_series(self, x, y)?;
        let c = y.iter().sum::<f64>() / y.len() as f64;
        FitOutcome::evaluate(self, x, y, vec![c], |_| c)
    }
}

/// y = slope * x + intercept
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearModel;

impl FitModel for LinearModel {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["slope", "intercept"]
    }

    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FitOutcome, FitError> {
        check_series(self, x, y)?;
        let coeffs = polyfit(x, y, 1)?;
        let (intercept, slope) = (coeffs[0], coeffs[1]);
        FitOutcome::evaluate(self, x, y, vec![slope, intercept], |xi| slope * xi + intercept)
    }
}

/// y = a * x^2 + b * x + c
#[derive(Debug, Clone, Copy, Default)]
pub struct QuadraticModel;

impl FitModel for QuadraticModel {
    fn name(&self) -> &'static str {
        "quadratic"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["a", "b", "c"]
    }

    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FitOutcome, FitError> {
        check_series(self, x, y)?;
        let coeffs = polyfit(x, y, 2)?;
        let (c, b, a) = (coeffs[0], coeffs[1], coeffs[2]);
        FitOutcome::evaluate(self, x, y, vec![a, b, c], |xi| horner(&coeffs, xi))
    }
}
