//! Protocol error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected binary response")]
    MissingBinaryMarker,

    #[error("Invalid binary payload: {0}")]
    InvalidBinary(String),
}
