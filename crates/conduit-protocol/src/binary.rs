//! Binary framing
//!
//! Envelopes are text, so raw bytes travel as a marked object:
//! `{"binary": true, "data": "<base64>"}`.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::ProtocolError;
use crate::Result;

const MARKER: &str = "binary";
const DATA: &str = "data";

/// Wrap raw bytes into a text-safe binary frame.
pub fn frame(bytes: &[u8]) -> Value {
    json!({ MARKER: true, DATA: B64.encode(bytes) })
}

/// Whether `value` carries the binary marker.
pub fn is_framed(value: &Value) -> bool {
    value.get(MARKER).and_then(Value::as_bool) == Some(true)
}

/// Extract the bytes from a binary frame.
pub fn unframe(value: &Value) -> Result<Vec<u8>> {
    if !is_framed(value) {
        return Err(ProtocolError::MissingBinaryMarker);
    }

    let data = match value.get(DATA) {
        Some(Value::String(s)) => s,
        Some(_) => {
            return Err(ProtocolError::InvalidBinary(
                "data is not a string".to_string(),
            ))
        }
        None => return Ok(Vec::new()),
    };

    B64.decode(data)
        .map_err(|e| ProtocolError::InvalidBinary(e.to_string()))
}
