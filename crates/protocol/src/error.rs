//! Protocol error types.

/// Errors produced while decoding or encoding hub frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    InvalidFrame,

    #[error("frame has a non-integer `type` field")]
    MissingType,
}
