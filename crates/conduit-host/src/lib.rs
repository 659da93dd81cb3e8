//! Conduit Host
//!
//! The native end of the bridge. A `NativeHost` keeps a registry of method,
//! stream and event handlers, answers every inbound request through a
//! transport, and understands the `_batch` and `_stream.cancel` conventions
//! used by `conduit-core`.

mod error;
mod host;
mod loopback;
mod sink;

pub use error::HostError;
pub use host::NativeHost;
pub use loopback::{connect, Loopback};
pub use sink::StreamSink;

pub type Result<T> = std::result::Result<T, HostError>;
