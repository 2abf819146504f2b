use std::path::Path;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Target of the per-result JSON events written to the report log.
pub const FIT_REPORT_TARGET: &str = "fit_report";

pub const LOG_FILE: &str = "fitstream.log";
pub const REPORT_FILE: &str = "fitstream-report.json";

/// Higher-value variants are more severe.
#[derive(
    Debug, Copy, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
    EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level. `critical` has no tracing
    /// equivalent and filters as `error`.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// `RUST_LOG` wins over the configured level when set.
fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the global subscriber.
///
/// With a `log_dir`, logs go to a daily rolling text file and every
/// `fit_report` event is also written as one JSON line to a separate daily
/// rolling report file. Without one, logs go to stderr so stdout stays free
/// for published results.
pub fn init_tracing(log_dir: Option<&Path>, level: LogLevel) -> Result<()> {
    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create log directory {}", dir.display()))?;

            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let txt_layer = fmt::layer().with_writer(txt_appender).with_ansi(false);

            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, REPORT_FILE);
            let json_layer = fmt::layer()
                .json()
                .with_writer(json_appender)
                .with_target(true)
                .with_filter(EnvFilter::new(format!("{FIT_REPORT_TARGET}=info")));

            Registry::default()
                .with(env_filter(level))
                .with(txt_layer)
                .with(json_layer)
                .try_init()
                .context("tracing subscriber already installed")?;
        }
        None => {
            fmt()
                .with_env_filter(env_filter(level))
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .try_init()
                .map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {e}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_levels() {
        assert_eq!(LogLevel::from_str("debug").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("WARN").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("critical").unwrap(), LogLevel::Critical);
        assert!(LogLevel::from_str("verbose").is_err());
        assert_eq!(LogLevel::Critical.to_string(), "critical");
    }

    #[test]
    fn test_critical_filters_as_error() {
        assert_eq!(LogLevel::Critical.directive(), "error");
        assert!(LogLevel::Critical > LogLevel::Error);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
