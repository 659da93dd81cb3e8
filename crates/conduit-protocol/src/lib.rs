//! Conduit Protocol
//!
//! Wire-level types shared by both ends of the native bridge:
//! - The envelope shape (requests, responses, events, stream events)
//! - The JSON text codec used by every transport
//! - Base64 framing for binary payloads carried inside an envelope

pub mod binary;
pub mod codec;
mod envelope;
mod error;

pub use codec::{decode, encode};
pub use envelope::{Envelope, EnvelopeKind, ErrorPayload, StreamEvent};
pub use error::ProtocolError;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Method name of the batch wrapper request.
pub const BATCH_METHOD: &str = "_batch";

/// Method name of the best-effort stream cancellation event.
pub const STREAM_CANCEL_METHOD: &str = "_stream.cancel";

/// Numeric error codes carried in [`ErrorPayload::code`].
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;

    pub const TIMED_OUT: i64 = -32001;
    pub const TRANSPORT: i64 = -32002;
    pub const QUEUE_FULL: i64 = -32003;
    pub const PROTOCOL: i64 = -32004;
    pub const DESTROYED: i64 = -32005;
    /// Used when a native stream fails without supplying an error.
    pub const STREAM_ERROR: i64 = -32006;
}
