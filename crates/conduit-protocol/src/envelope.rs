//! Envelope data structure
//!
//! A single shape covers every message crossing the bridge:
//! ```text
//! request  { id, method, params?, streamId? }
//! response { id, result? | error? }
//! event    { id, method, params? }
//! stream   { id, streamId, streamEvent, result? | error? }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Call expecting a response with the same id
    Request,
    /// Answer to a request
    Response,
    /// Fire-and-forget notification
    Event,
    /// Item on a long-lived stream channel
    Stream,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Request => "request",
            EnvelopeKind::Response => "response",
            EnvelopeKind::Event => "event",
            EnvelopeKind::Stream => "stream",
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    Data,
    End,
    Error,
}

/// Error object carried by a response or a failed stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

impl ErrorPayload {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_event: Option<StreamEvent>,
}

// A field that is present on the wire is `Some`, even when it is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Envelope {
    fn bare(id: impl Into<String>, kind: EnvelopeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            method: None,
            params: None,
            result: None,
            error: None,
            stream_id: None,
            stream_event: None,
        }
    }

    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        let mut envelope = Self::bare(id, EnvelopeKind::Request);
        envelope.method = Some(method.into());
        envelope.params = Some(params);
        envelope
    }

    /// Request opening a stream channel identified by `stream_id`.
    pub fn stream_request(
        id: impl Into<String>,
        method: impl Into<String>,
        params: Value,
        stream_id: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::request(id, method, params);
        envelope.stream_id = Some(stream_id.into());
        envelope
    }

    pub fn response_ok(id: impl Into<String>, result: Value) -> Self {
        let mut envelope = Self::bare(id, EnvelopeKind::Response);
        envelope.result = Some(result);
        envelope
    }

    pub fn response_err(id: impl Into<String>, error: ErrorPayload) -> Self {
        let mut envelope = Self::bare(id, EnvelopeKind::Response);
        envelope.error = Some(error);
        envelope
    }

    pub fn event(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        let mut envelope = Self::bare(id, EnvelopeKind::Event);
        envelope.method = Some(method.into());
        envelope.params = Some(params);
        envelope
    }

    pub fn stream_data(id: impl Into<String>, stream_id: impl Into<String>, data: Value) -> Self {
        let mut envelope = Self::stream_item(id, stream_id, StreamEvent::Data);
        envelope.result = Some(data);
        envelope
    }

    pub fn stream_end(id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self::stream_item(id, stream_id, StreamEvent::End)
    }

    pub fn stream_error(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        error: Option<ErrorPayload>,
    ) -> Self {
        let mut envelope = Self::stream_item(id, stream_id, StreamEvent::Error);
        envelope.error = error;
        envelope
    }

    fn stream_item(id: impl Into<String>, stream_id: impl Into<String>, event: StreamEvent) -> Self {
        let mut envelope = Self::bare(id, EnvelopeKind::Stream);
        envelope.stream_id = Some(stream_id.into());
        envelope.stream_event = Some(event);
        envelope
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }
}
