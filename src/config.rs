use std::{env, fs, path::{Path, PathBuf}};

use async_trait::async_trait;
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::model::ModelRegistry;
use crate::processor::MIN_WINDOW;

pub const ENV_PREFIX: &str = "FITSTREAM_";
const REQUIRED_KEYS: [&str; 4] = ["stream", "output", "model", "input_xy"];

fn default_run_key() -> String {
    "run_key".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

/// Process-wide worker settings, fixed for the lifetime of a worker.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Channel envelopes are received on.
    pub stream: String,
    /// Channel results are published on; also the key of the result series.
    pub output: String,
    /// Name of a registered fitting model.
    pub model: String,
    /// Dotted key paths of the x and y values inside the payload.
    pub input_xy: [String; 2],
    /// Dotted key path of the run identifier inside the payload.
    #[serde(default = "default_run_key")]
    pub run_key: String,
    /// Keep at most this many points of the current run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_points: Option<usize>,
    /// Capacity of the bounded work queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on how long shutdown waits for the worker to exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_ms: Option<u64>,
}

impl WorkerConfig {
    pub fn new(stream: &str, output: &str, model: &str, x_path: &str, y_path: &str) -> Self {
        Self {
            stream: stream.to_string(),
            output: output.to_string(),
            model: model.to_string(),
            input_xy: [x_path.to_string(), y_path.to_string()],
            run_key: default_run_key(),
            max_points: None,
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_ms: None,
        }
    }

    /// Build a configuration from a JSON mapping, reporting missing and
    /// malformed keys individually.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let map = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ConfigError::Parse(format!(
                    "expected a mapping, found {}",
                    type_name(&other)
                )));
            }
        };
        for key in REQUIRED_KEYS {
            if !map.contains_key(key) {
                return Err(ConfigError::MissingKey(key.to_string()));
            }
        }
        match map.get("input_xy") {
            Some(Value::Array(items)) if items.len() == 2 && items.iter().all(Value::is_string) => {}
            _ => {
                return Err(ConfigError::invalid(
                    "input_xy",
                    "expected a list of exactly two key paths",
                ));
            }
        }
        serde_json::from_value(Value::Object(map)).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check every value, and that `model` is known to `registry`.
    pub fn validate(&self, registry: &ModelRegistry) -> Result<(), ConfigError> {
        for (key, value) in [("stream", &self.stream), ("output", &self.output), ("model", &self.model), ("run_key", &self.run_key)] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(key, "must not be empty"));
            }
        }
        if self.output == self.stream {
            return Err(ConfigError::invalid(
                "output",
                "must differ from `stream`, results would be fed back into the worker",
            ));
        }
        if self.input_xy.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::invalid("input_xy", "key paths must not be empty"));
        }
        if !registry.contains(&self.model) {
            return Err(ConfigError::UnknownModel(self.model.clone()));
        }
        if let Some(max) = self.max_points {
            if max < MIN_WINDOW {
                return Err(ConfigError::invalid(
                    "max_points",
                    format!("must be at least {MIN_WINDOW}"),
                ));
            }
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "must be at least 1"));
        }
        Ok(())
    }

    pub fn x_path(&self) -> &str {
        &self.input_xy[0]
    }

    pub fn y_path(&self) -> &str {
        &self.input_xy[1]
    }

    /// Key the fitted series is published under.
    pub fn output_name(&self) -> &str {
        &self.output
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// A flat key/value source of configuration overrides.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn as_vec(&self) -> Vec<(String, String)> {
        let mut config = vec![];
        for key in self.keys().await {
            if let Some(value) = self.get(&key).await {
                config.push((key, value));
            }
        }
        config
    }
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str);
    async fn del(&self, key: &str);
}

/// Reads the process environment, after loading an optional `.env` file.
#[derive(Clone, Debug)]
pub struct EnvConfigStore;

impl EnvConfigStore {
    pub fn new(env_file: Option<PathBuf>) -> Self {
        if let Some(file) = &env_file {
            if file.exists() {
                dotenvy::from_path(file).ok();
                info!("Loaded .env from {}", file.display());
            } else {
                warn!("could not load .env from {}", file.display())
            }
        }
        Self
    }
}

#[async_trait]
impl ConfigStore for EnvConfigStore {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) {
        unsafe {
            env::set_var(key, value);
        };
    }

    async fn del(&self, key: &str) {
        unsafe {
            env::remove_var(key);
        };
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapConfigStore {
    map: DashMap<String, String>,
}

impl MapConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MapConfigStore {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }

    async fn del(&self, key: &str) {
        self.map.remove(key);
    }
}

/// Overlay `FITSTREAM_<KEY>` values from `store` onto a configuration map.
/// `FITSTREAM_INPUT_XY` takes the two paths separated by a comma.
pub async fn apply_overrides(map: &mut Map<String, Value>, store: &dyn ConfigStore) -> Result<(), ConfigError> {
    const STRINGS: [&str; 4] = ["stream", "output", "model", "run_key"];
    const NUMBERS: [&str; 3] = ["max_points", "queue_capacity", "shutdown_timeout_ms"];

    for key in STRINGS {
        if let Some(value) = store.get(&env_key(key)).await {
            map.insert(key.to_string(), Value::String(value));
        }
    }
    for key in NUMBERS {
        if let Some(value) = store.get(&env_key(key)).await {
            let number: u64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key, format!("`{value}` is not a whole number")))?;
            map.insert(key.to_string(), Value::from(number));
        }
    }
    if let Some(value) = store.get(&env_key("input_xy")).await {
        let paths: Vec<Value> = value
            .split(',')
            .map(|p| Value::String(p.trim().to_string()))
            .collect();
        map.insert("input_xy".to_string(), Value::Array(paths));
    }
    Ok(())
}

fn env_key(key: &str) -> String {
    format!("{ENV_PREFIX}{}", key.to_uppercase())
}

/// Read a YAML (or JSON) configuration file and apply overrides from `store`.
/// The result is parsed but not yet validated against a model registry.
pub async fn load_config(path: &Path, store: &dyn ConfigStore) -> Result<WorkerConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = if contents.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml_bw::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?
    };
    let mut map = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ConfigError::Parse(format!(
                "expected a mapping, found {}",
                type_name(&other)
            )));
        }
    };
    apply_overrides(&mut map, store).await?;
    WorkerConfig::from_value(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs::write;
    use tempfile::tempdir;

    fn base() -> Value {
        json!({
            "stream": "scans",
            "output": "fits",
            "model": "linear",
            "input_xy": ["data.t", "data.v"]
        })
    }

    #[test]
    fn test_from_value_applies_defaults() {
        let cfg = WorkerConfig::from_value(base()).unwrap();
        assert_eq!(cfg.x_path(), "data.t");
        assert_eq!(cfg.y_path(), "data.v");
        assert_eq!(cfg.output_name(), "fits");
        assert_eq!(cfg.run_key, "run_key");
        assert_eq!(cfg.queue_capacity, 1024);
        assert_eq!(cfg.max_points, None);
        assert!(cfg.validate(&ModelRegistry::builtin()).is_ok());
    }

    #[test]
    fn test_missing_required_key() {
        for key in REQUIRED_KEYS {
            let mut value = base();
            value.as_object_mut().unwrap().remove(key);
            match WorkerConfig::from_value(value) {
                Err(ConfigError::MissingKey(k)) => assert_eq!(k, key),
                other => panic!("expected missing `{key}`, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_input_xy_must_have_two_paths() {
        for bad in [json!(["only"]), json!(["a", "b", "c"]), json!("a,b"), json!([1, 2])] {
            let mut value = base();
            value["input_xy"] = bad;
            assert!(matches!(
                WorkerConfig::from_value(value),
                Err(ConfigError::InvalidValue { key, .. }) if key == "input_xy"
            ));
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut value = base();
        value["colour"] = json!("green");
        assert!(matches!(WorkerConfig::from_value(value), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validate_unknown_model() {
        let mut cfg = WorkerConfig::from_value(base()).unwrap();
        cfg.model = "spline".into();
        assert!(matches!(
            cfg.validate(&ModelRegistry::builtin()),
            Err(ConfigError::UnknownModel(m)) if m == "spline"
        ));
    }

    #[test]
    fn test_validate_bounds() {
        let registry = ModelRegistry::builtin();
        let mut cfg = WorkerConfig::new("s", "o", "linear", "x", "y");
        cfg.max_points = Some(2);
        assert!(cfg.validate(&registry).is_err());
        cfg.max_points = Some(3);
        assert!(cfg.validate(&registry).is_ok());
        cfg.queue_capacity = 0;
        assert!(cfg.validate(&registry).is_err());
        let mut cfg = WorkerConfig::new("s", " ", "linear", "x", "y");
        assert!(cfg.validate(&registry).is_err());
        cfg.output = "o".into();
        cfg.input_xy[1] = String::new();
        assert!(cfg.validate(&registry).is_err());
    }

    #[test]
    fn test_validate_rejects_output_equal_to_stream() {
        let cfg = WorkerConfig::new("scans", "scans", "linear", "x", "y");
        assert!(matches!(
            cfg.validate(&ModelRegistry::builtin()),
            Err(ConfigError::InvalidValue { key, .. }) if key == "output"
        ));
    }

    #[tokio::test]
    async fn test_map_store_basic() {
        let store = MapConfigStore::new();
        store.set("foo", "bar").await;
        assert_eq!(store.get("foo").await, Some("bar".to_string()));
        store.set("foo", "baz").await;
        assert_eq!(store.as_vec().await, vec![("foo".to_string(), "baz".to_string())]);
        store.del("foo").await;
        assert_eq!(store.get("foo").await, None);
    }

    #[tokio::test]
    async fn test_overrides_replace_file_values() {
        let store = MapConfigStore::new();
        store.set("FITSTREAM_MODEL", "quadratic").await;
        store.set("FITSTREAM_INPUT_XY", "a.x, a.y").await;
        store.set("FITSTREAM_MAX_POINTS", "50").await;

        let mut map = base().as_object().cloned().unwrap();
        apply_overrides(&mut map, &store).await.unwrap();
        let cfg = WorkerConfig::from_value(Value::Object(map)).unwrap();
        assert_eq!(cfg.model, "quadratic");
        assert_eq!(cfg.input_xy, ["a.x".to_string(), "a.y".to_string()]);
        assert_eq!(cfg.max_points, Some(50));
    }

    #[tokio::test]
    async fn test_overrides_reject_bad_number() {
        let store = MapConfigStore::new();
        store.set("FITSTREAM_QUEUE_CAPACITY", "lots").await;
        let mut map = Map::new();
        let err = apply_overrides(&mut map, &store).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "queue_capacity"));
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("worker.yaml");
        write(
            &path,
            "stream: scans\noutput: fits\nmodel: gaussian\ninput_xy: [motor.pos, det.counts]\nmax_points: 20\n",
        )
        .unwrap();

        let cfg = load_config(&path, &MapConfigStore::new()).await.unwrap();
        assert_eq!(cfg.model, "gaussian");
        assert_eq!(cfg.x_path(), "motor.pos");
        assert_eq!(cfg.max_points, Some(20));
    }

    #[tokio::test]
    async fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/worker.yaml"), &MapConfigStore::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn test_env_store_reads_env_file() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        write(&env_path, "FITSTREAM_TEST_ENV_FILE_KEY=abc123\n").unwrap();

        let store = EnvConfigStore::new(Some(env_path));
        assert_eq!(
            store.get("FITSTREAM_TEST_ENV_FILE_KEY").await,
            Some("abc123".to_string())
        );
        store.del("FITSTREAM_TEST_ENV_FILE_KEY").await;
        assert_eq!(store.get("FITSTREAM_TEST_ENV_FILE_KEY").await, None);
    }
}
