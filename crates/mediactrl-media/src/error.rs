use std::io;
use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for media operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (recording sink, prompt cache disk spill)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Codec encode/decode failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Frame did not have the expected sample count for the operation
    #[error("invalid frame size: expected {expected}, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Prompt fetch failed (network error or non-2xx response)
    #[error("prompt fetch failed for {uri}: {reason}")]
    PromptFetch { uri: String, reason: String },

    /// Requested codec has no implementation
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Recording sink used after it was closed
    #[error("recording sink already closed")]
    SinkClosed,

    #[error("{0}")]
    Other(String),
}
