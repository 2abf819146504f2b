use std::{fs, path::{Path, PathBuf}};

use anyhow::Error;
use schemars::schema_for;

use crate::config::WorkerConfig;

pub const CONFIG_SCHEMA_FILE: &str = "worker-config.schema.json";

/// Write the JSON schema of the worker configuration into `out_dir`.
pub fn write_schema(out_dir: &Path) -> Result<PathBuf, Error> {
    fs::create_dir_all(out_dir)?;
    let schema = schema_for!(WorkerConfig);
    let path = out_dir.join(CONFIG_SCHEMA_FILE);
    fs::write(&path, serde_json::to_string_pretty(&schema)?)?;
    Ok(path)
}
