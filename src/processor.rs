//! The stateful step that turns envelopes into fit results.
//!
//! Points are accumulated per run. The run is identified by the value found at
//! the configured `run_key` path, and any change of that value starts a new
//! run, so interleaved runs reset on every switch.
use std::sync::Arc;

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::config::WorkerConfig;
use crate::message::{Delivery, Envelope, FitResult};
use crate::model::{FitModel, FitOutcome};
use crate::util::{as_numeric, resolve_path};

/// Fewest points a fit is attempted with.
pub const MIN_WINDOW: usize = 3;

/// Why an envelope produced no result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkipReason {
    #[error("no value at `{0}`")]
    MissingAxis(String),

    #[error("value at `{0}` is not a number")]
    NotNumeric(String),

    #[error("have {have} points, need {need}")]
    InsufficientPoints { have: usize, need: usize },

    #[error("fit failed: {0}")]
    FitFailed(String),
}

/// Outcome of processing one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Produced(FitResult),
    Skipped(SkipReason),
}

impl Step {
    pub fn is_produced(&self) -> bool {
        matches!(self, Step::Produced(_))
    }

    pub fn into_result(self) -> Option<FitResult> {
        match self {
            Step::Produced(result) => Some(result),
            Step::Skipped(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    run_key: Option<Value>,
    points: Vec<(f64, f64)>,
}

impl Accumulator {
    /// Adopt `key`, dropping all points when it differs from the current run.
    fn enter_run(&mut self, key: Value) {
        if self.run_key.as_ref() != Some(&key) {
            self.points.clear();
            self.run_key = Some(key);
        }
    }

    fn push(&mut self, point: (f64, f64), cap: Option<usize>) {
        self.points.push(point);
        if let Some(cap) = cap {
            let excess = self.points.len().saturating_sub(cap);
            if excess > 0 {
                self.points.drain(..excess);
            }
        }
    }

    fn series(&self) -> (Vec<f64>, Vec<f64>) {
        self.points.iter().copied().unzip()
    }
}

pub struct Processor {
    config: Arc<WorkerConfig>,
    model: Arc<dyn FitModel>,
    state: Accumulator,
}

impl Processor {
    pub fn new(config: Arc<WorkerConfig>, model: Arc<dyn FitModel>) -> Self {
        Self {
            config,
            model,
            state: Accumulator::default(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Points of the current run, oldest first.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.state.points
    }

    /// Run key of the last accepted envelope.
    pub fn run_key(&self) -> Option<&Value> {
        self.state.run_key.as_ref()
    }

    pub fn process(&mut self, envelope: &Envelope) -> Step {
        let payload = envelope.payload();
        let x = match self.read_axis(payload, self.config.x_path()) {
            Ok(v) => v,
            Err(reason) => return Step::Skipped(reason),
        };
        let y = match self.read_axis(payload, self.config.y_path()) {
            Ok(v) => v,
            Err(reason) => return Step::Skipped(reason),
        };

        let key = resolve_path(payload, &self.config.run_key)
            .cloned()
            .unwrap_or(Value::Null);
        self.state.enter_run(key);
        self.state.push((x, y), self.config.max_points);

        let have = self.state.points.len();
        if have < MIN_WINDOW {
            return Step::Skipped(SkipReason::InsufficientPoints { have, need: MIN_WINDOW });
        }

        let (xs, ys) = self.state.series();
        match self.model.fit(&xs, &ys) {
            Ok(outcome) => Step::Produced(self.build_result(envelope, xs, outcome)),
            Err(e) => Step::Skipped(SkipReason::FitFailed(e.to_string())),
        }
    }

    /// Process every envelope of `delivery` in order.
    pub fn process_delivery(&mut self, delivery: &Delivery) -> Vec<Step> {
        match delivery {
            Delivery::Single(envelope) => vec![self.process(envelope)],
            Delivery::Batch(items) => items.iter().map(|e| self.process(e)).collect(),
        }
    }

    fn read_axis(&self, payload: &Map<String, Value>, path: &str) -> Result<f64, SkipReason> {
        let value = resolve_path(payload, path).ok_or_else(|| SkipReason::MissingAxis(path.to_string()))?;
        as_numeric(value).ok_or_else(|| SkipReason::NotNumeric(path.to_string()))
    }

    fn build_result(&self, envelope: &Envelope, xs: Vec<f64>, outcome: FitOutcome) -> FitResult {
        let mut data = Map::new();
        data.insert(
            self.config.output_name().to_string(),
            json!({ "x": xs, "y": outcome.best_fit }),
        );
        data.insert("input".to_string(), json!(self.config.input_xy));

        let parameters: Map<String, Value> = outcome
            .parameters
            .into_iter()
            .map(|(name, value)| (name, json!(value)))
            .collect();

        let mut metadata = envelope.metadata().clone();
        metadata.insert("fit_parameters".to_string(), Value::Object(parameters));
        metadata.insert("fit_summary".to_string(), Value::String(outcome.summary));
        metadata.insert(
            "fit_statistics".to_string(),
            json!({
                "chi_square": outcome.statistics.chi_square,
                "r_squared": outcome.statistics.r_squared,
                "n_points": outcome.statistics.n_points,
            }),
        );
        metadata.insert("model".to_string(), Value::String(outcome.model));

        FitResult { data, metadata }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelRegistry;
    use serde_json::json;

    fn processor(model: &str) -> Processor {
        let config = WorkerConfig::new("scans", "fits", model, "data.t", "data.v");
        let model = ModelRegistry::builtin().get(model).unwrap();
        Processor::new(Arc::new(config), model)
    }

    fn envelope(run: &str, t: Value, v: Value) -> Envelope {
        Envelope::from_payload(json!({"run_key": run, "data": {"t": t, "v": v}})).unwrap()
    }

    fn point(run: &str, t: f64, v: f64) -> Envelope {
        envelope(run, json!(t), json!(v))
    }

    #[test]
    fn test_same_run_concatenates_points() {
        let mut p = processor("linear");
        p.process(&point("A", 0.0, 1.0));
        p.process(&point("A", 1.0, 3.0));
        assert_eq!(p.points(), &[(0.0, 1.0), (1.0, 3.0)]);
        assert_eq!(p.run_key(), Some(&json!("A")));
    }

    #[test]
    fn test_run_change_purges_points() {
        let mut p = processor("linear");
        p.process(&point("A", 0.0, 1.0));
        p.process(&point("A", 1.0, 2.0));
        p.process(&point("B", 5.0, 6.0));
        assert_eq!(p.points(), &[(5.0, 6.0)]);
        assert_eq!(p.run_key(), Some(&json!("B")));
    }

    #[test]
    fn test_interleaved_runs_reset_every_time() {
        let mut p = processor("linear");
        for (run, t) in [("A", 0.0), ("B", 1.0), ("A", 2.0), ("B", 3.0)] {
            let step = p.process(&point(run, t, t));
            assert_eq!(step, Step::Skipped(SkipReason::InsufficientPoints { have: 1, need: 3 }));
            assert_eq!(p.points(), &[(t, t)]);
        }
    }

    #[test]
    fn test_skips_leave_state_untouched() {
        let mut p = processor("linear");
        p.process(&point("A", 0.0, 1.0));

        let missing = Envelope::from_payload(json!({"run_key": "B", "data": {"t": 1}})).unwrap();
        assert_eq!(
            p.process(&missing),
            Step::Skipped(SkipReason::MissingAxis("data.v".into()))
        );
        for bad in [json!("1.0"), json!(true), json!(null), json!([1]), json!({"a": 1})] {
            assert_eq!(
                p.process(&envelope("B", bad, json!(2))),
                Step::Skipped(SkipReason::NotNumeric("data.t".into()))
            );
        }
        assert_eq!(p.points(), &[(0.0, 1.0)]);
        assert_eq!(p.run_key(), Some(&json!("A")));
    }

    #[test]
    fn test_three_points_produce_result() {
        let mut p = processor("linear");
        assert!(!p.process(&point("A", 0.0, 1.0)).is_produced());
        assert_eq!(
            p.process(&point("A", 1.0, 2.0)),
            Step::Skipped(SkipReason::InsufficientPoints { have: 2, need: 3 })
        );
        let meta = point("A", 2.0, 3.0).with_metadata("scan", json!(7));
        let result = p.process(&meta).into_result().unwrap();

        assert_eq!(result.data["input"], json!(["data.t", "data.v"]));
        assert_eq!(result.data["fits"]["x"], json!([0.0, 1.0, 2.0]));
        assert_eq!(result.data["fits"]["y"].as_array().unwrap().len(), 3);
        assert_eq!(result.metadata["scan"], json!(7));
        assert_eq!(result.metadata["model"], json!("linear"));
        assert_eq!(result.metadata["fit_statistics"]["n_points"], json!(3));
        let slope = result.metadata["fit_parameters"]["slope"].as_f64().unwrap();
        assert!((slope - 1.0).abs() < 1e-9);
        assert!(result.metadata["fit_summary"].as_str().unwrap().contains("[[Variables]]"));
    }

    #[test]
    fn test_fit_failure_keeps_point() {
        let mut p = processor("linear");
        p.process(&point("A", 1.0, 1.0));
        p.process(&point("A", 1.0, 2.0));
        let step = p.process(&point("A", 1.0, 3.0));
        assert!(matches!(step, Step::Skipped(SkipReason::FitFailed(_))));
        assert_eq!(p.points().len(), 3);
    }

    #[test]
    fn test_max_points_slides_window() {
        let mut config = WorkerConfig::new("scans", "fits", "linear", "data.t", "data.v");
        config.max_points = Some(3);
        let model = ModelRegistry::builtin().get("linear").unwrap();
        let mut p = Processor::new(Arc::new(config), model);
        for t in 0..5 {
            p.process(&point("A", t as f64, t as f64));
        }
        assert_eq!(p.points(), &[(2.0, 2.0), (3.0, 3.0), (4.0, 4.0)]);
    }

    #[test]
    fn test_missing_run_key_counts_as_one_run() {
        let mut p = processor("constant");
        for t in 0..3 {
            let e = Envelope::from_payload(json!({"data": {"t": t, "v": 2}})).unwrap();
            let step = p.process(&e);
            assert_eq!(step.is_produced(), t == 2);
        }
        assert_eq!(p.run_key(), Some(&Value::Null));
    }

    #[test]
    fn test_process_delivery_keeps_order() {
        let mut p = processor("linear");
        let batch = Delivery::Batch((0..4).map(|t| point("A", t as f64, 2.0 * t as f64)).collect());
        let steps = p.process_delivery(&batch);
        let produced: Vec<bool> = steps.iter().map(Step::is_produced).collect();
        assert_eq!(produced, vec![false, false, true, true]);
    }
}
