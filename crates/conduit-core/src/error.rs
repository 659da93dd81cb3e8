//! Bridge error types

use conduit_protocol::{codes, ErrorPayload, ProtocolError};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Transport closed")]
    Closed,

    #[error("Send failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    TimedOut { method: String, timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Offline queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Bridge destroyed")]
    Destroyed,

    /// Error returned by the native handler
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl BridgeError {
    pub fn code(&self) -> i64 {
        match self {
            BridgeError::TimedOut { .. } => codes::TIMED_OUT,
            BridgeError::Transport(_) => codes::TRANSPORT,
            BridgeError::QueueFull { .. } => codes::QUEUE_FULL,
            BridgeError::Protocol(_) => codes::PROTOCOL,
            BridgeError::Destroyed => codes::DESTROYED,
            BridgeError::Remote { code, .. } => *code,
        }
    }

    /// Connection and timeout failures are worth another attempt;
    /// application errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::TimedOut { .. } | BridgeError::Transport(TransportError::Disconnected)
        )
    }

    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            BridgeError::Remote {
                code,
                message,
                data,
            } => ErrorPayload {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            other => ErrorPayload::new(other.code(), other.to_string()),
        }
    }
}

impl From<ErrorPayload> for BridgeError {
    fn from(payload: ErrorPayload) -> Self {
        BridgeError::Remote {
            code: payload.code,
            message: payload.message,
            data: payload.data,
        }
    }
}

impl From<ProtocolError> for BridgeError {
    fn from(e: ProtocolError) -> Self {
        BridgeError::Protocol(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        let timed_out = BridgeError::TimedOut {
            method: "a".to_string(),
            timeout_ms: 10,
        };
        assert!(timed_out.is_retryable());
        assert!(BridgeError::Transport(TransportError::Disconnected).is_retryable());

        assert!(!BridgeError::Transport(TransportError::Closed).is_retryable());
        assert!(!BridgeError::QueueFull { capacity: 1 }.is_retryable());
        assert!(!BridgeError::Destroyed.is_retryable());
        assert!(!BridgeError::from(ErrorPayload::new(-32603, "boom")).is_retryable());
    }

    #[test]
    fn test_codes() {
        assert_eq!(BridgeError::Destroyed.code(), codes::DESTROYED);
        assert_eq!(
            BridgeError::Protocol("x".to_string()).code(),
            codes::PROTOCOL
        );
        assert_eq!(BridgeError::from(ErrorPayload::new(42, "app")).code(), 42);
    }

    #[test]
    fn test_remote_payload_round_trip() {
        let payload = ErrorPayload::new(7, "nope").with_data(serde_json::json!({"field": "name"}));
        let err = BridgeError::from(payload.clone());
        assert_eq!(err.to_payload(), payload);
    }
}
