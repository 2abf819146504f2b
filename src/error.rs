use std::path::PathBuf;

use stream_channel::ChannelError;
use thiserror::Error;

/// Raised while validating a worker configuration, before anything starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration key `{0}`")]
    MissingKey(String),

    #[error("configuration key `{key}` is invalid: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("could not read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// A result could not be handed to the output channel.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("could not serialise result: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publishing to `{channel}` failed: {source}")]
    Channel {
        channel: String,
        #[source]
        source: ChannelError,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("work queue is full")]
    Full,

    #[error("work queue is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("worker is already started")]
    AlreadyStarted,

    #[error("could not subscribe to `{channel}`: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: ChannelError,
    },

    #[error("worker did not stop within {0} ms")]
    ShutdownTimeout(u64),

    #[error("worker task failed: {0}")]
    Join(String),
}
