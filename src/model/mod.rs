//! Parametric models fitted to the accumulated window, and the registry the
//! worker configuration selects them from.
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

mod polynomial;
mod transformed;

pub use polynomial::{ConstantModel, LinearModel, QuadraticModel};
pub use transformed::{ExponentialModel, GaussianModel};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("x and y series differ in length ({x} vs {y})")]
    LengthMismatch { x: usize, y: usize },

    #[error("need at least {need} points, have {have}")]
    TooFewPoints { have: usize, need: usize },

    #[error("design matrix is singular (x values too few or identical)")]
    Singular,

    #[error("model requires strictly positive y values")]
    NonPositive,

    #[error("fit produced an invalid solution: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FitStatistics {
    pub n_points: usize,
    pub n_variables: usize,
    pub chi_square: f64,
    pub r_squared: f64,
}

/// Everything one fit produces.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    pub model: String,
    /// Fitted y values aligned with the input x series.
    pub best_fit: Vec<f64>,
    /// Parameter name → value, in the model's declared order.
    pub parameters: Vec<(String, f64)>,
    pub statistics: FitStatistics,
    pub summary: String,
}

impl FitOutcome {
    /// Evaluate `eval` over `x`, score it against `y` and render the report.
    pub fn evaluate<F>(model: &dyn FitModel, x: &[f64], y: &[f64], values: Vec<f64>, eval: F) -> Result<Self, FitError>
    where
        F: Fn(f64) -> f64,
    {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::Invalid("non-finite parameter".to_string()));
        }
        let best_fit: Vec<f64> = x.iter().map(|&xi| eval(xi)).collect();
        if best_fit.iter().any(|v| !v.is_finite()) {
            return Err(FitError::Invalid("non-finite fitted value".to_string()));
        }

        let mean = y.iter().sum::<f64>() / y.len() as f64;
        let chi_square: f64 = y.iter().zip(&best_fit).map(|(o, f)| (o - f).powi(2)).sum();
        let total: f64 = y.iter().map(|o| (o - mean).powi(2)).sum();
        let r_squared = if total > 0.0 {
            1.0 - chi_square / total
        } else if chi_square <= f64::EPSILON {
            1.0
        } else {
            0.0
        };

        let parameters: Vec<(String, f64)> = model
            .parameter_names()
            .iter()
            .map(|n| n.to_string())
            .zip(values)
            .collect();
        let statistics = FitStatistics {
            n_points: x.len(),
            n_variables: parameters.len(),
            chi_square,
            r_squared,
        };
        let summary = render_summary(model.name(), &statistics, &parameters);

        Ok(Self {
            model: model.name().to_string(),
            best_fit,
            parameters,
            statistics,
            summary,
        })
    }
}

fn render_summary(model: &str, stats: &FitStatistics, parameters: &[(String, f64)]) -> String {
    let width = parameters.iter().map(|(n, _)| n.len()).max().unwrap_or(0) + 1;
    let mut out = String::new();
    let _ = writeln!(out, "[[Model]]\n    {model}");
    let _ = writeln!(out, "[[Fit Statistics]]");
    let _ = writeln!(out, "    # data points = {}", stats.n_points);
    let _ = writeln!(out, "    # variables   = {}", stats.n_variables);
    let _ = writeln!(out, "    chi-square    = {:.6e}", stats.chi_square);
    let _ = writeln!(out, "    r-squared     = {:.6}", stats.r_squared);
    let _ = write!(out, "[[Variables]]");
    for (name, value) in parameters {
        let _ = write!(out, "\n    {:<width$} {:.6}", format!("{name}:"), value, width = width);
    }
    out
}

/// A model that can be fitted to an (x, y) series.
pub trait FitModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn parameter_names(&self) -> &'static [&'static str];

    /// Smallest window this model can be fitted to.
    fn min_points(&self) -> usize {
        self.parameter_names().len()
    }

    fn fit(&self, x: &[f64], y: &[f64]) -> Result<FitOutcome, FitError>;
}

impl fmt::Debug for dyn FitModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FitModel").field("name", &self.name()).finish()
    }
}

/// Shared input checks every model runs first.
pub(crate) fn check_series(model: &dyn FitModel, x: &[f64], y: &[f64]) -> Result<(), FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch { x: x.len(), y: y.len() });
    }
    let need = model.min_points();
    if x.len() < need {
        return Err(FitError::TooFewPoints { have: x.len(), need });
    }
    Ok(())
}

/// Models shipped with the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinModel {
    Constant,
    Linear,
    Quadratic,
    Exponential,
    Gaussian,
}

impl BuiltinModel {
    pub fn instantiate(self) -> Arc<dyn FitModel> {
        match self {
            BuiltinModel::Constant => Arc::new(ConstantModel),
            BuiltinModel::Linear => Arc::new(LinearModel),
            BuiltinModel::Quadratic => Arc::new(QuadraticModel),
            BuiltinModel::Exponential => Arc::new(ExponentialModel),
            BuiltinModel::Gaussian => Arc::new(GaussianModel),
        }
    }
}

/// Name → model lookup. Constructed explicitly and handed to whoever needs
/// it; there is no process-wide registry.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn FitModel>>,
}

impl ModelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every [`BuiltinModel`].
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for kind in BuiltinModel::iter() {
            registry.register(kind.instantiate());
        }
        registry
    }

    /// Add or replace a model under its own name.
    pub fn register(&mut self, model: Arc<dyn FitModel>) {
        self.models.insert(model.name().to_string(), model);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FitModel>> {
        self.models.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Sorted model names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry").field("models", &self.names()).finish()
    }
}
