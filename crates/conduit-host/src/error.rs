//! Host error types

use conduit_core::{codes, ErrorPayload, TransportError};
use conduit_protocol::ProtocolError;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Application failure reported by a handler.
    #[error("{message}")]
    Failed {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Stream closed: {0}")]
    StreamClosed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl HostError {
    pub fn failed(code: i64, message: impl Into<String>) -> Self {
        Self::Failed {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::Failed { code, .. } => *code,
            Self::StreamClosed(_) => codes::STREAM_ERROR,
            Self::Transport(_) => codes::TRANSPORT,
            Self::Protocol(_) => codes::PROTOCOL,
        }
    }

    /// Wire form sent back to the web side.
    pub fn to_payload(&self) -> ErrorPayload {
        let payload = ErrorPayload::new(self.code(), self.to_string());
        match self {
            Self::Failed {
                data: Some(data), ..
            } => payload.with_data(data.clone()),
            _ => payload,
        }
    }
}

/// Handlers decode their params with `serde_json::from_value(params)?`.
impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_codes() {
        let missing = HostError::MethodNotFound("fs.nope".to_string()).to_payload();
        assert_eq!(missing.code, -32601);
        assert_eq!(missing.message, "Method not found: fs.nope");

        let bad: HostError = serde_json::from_value::<u32>(json!("x")).unwrap_err().into();
        assert_eq!(bad.code(), codes::INVALID_PARAMS);
    }

    #[test]
    fn test_failed_carries_data() {
        let err = HostError::Failed {
            code: 404,
            message: "not found".to_string(),
            data: Some(json!({"path": "/a"})),
        };
        let payload = err.to_payload();
        assert_eq!(payload.code, 404);
        assert_eq!(payload.message, "not found");
        assert_eq!(payload.data, Some(json!({"path": "/a"})));

        assert_eq!(HostError::failed(7, "boom").to_payload().data, None);
    }
}
