use thiserror::Error;

/// Errors a channel transport can return.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Something went wrong encoding or decoding JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading from or writing to the underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport is not in a state where this operation is valid.
    #[error("invalid state for this operation: {0}")]
    InvalidState(String),

    /// The channel has been closed and accepts no more messages.
    #[error("channel `{0}` is closed")]
    Closed(String),

    /// The transport returned an unspecified failure.
    #[error("channel error: {0}")]
    Other(String),
}
