//! Codec error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors raised while decoding or encoding a frame.
///
/// Decoding errors are never fatal to the stream: the offending line is
/// dropped and parsing continues with the next one.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Line is not valid JSON
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Line is valid JSON but not an object
    #[error("expected a json object, got {kind}")]
    NotAnObject {
        /// JSON type that was found instead
        kind: &'static str,
    },
}
