//! Conduit Core
//!
//! The native bridge facade. One `Bridge` per embedding context owns all
//! bridge state: pending requests, the offline queue, stream subscriptions,
//! the batch buffer and event listeners. Consumers only ever see futures.

mod batch;
mod bridge;
mod config;
mod correlator;
mod error;
mod events;
mod queue;
mod retry;
mod stream;
mod transport;

#[cfg(test)]
mod testing;

pub use batch::BatchCall;
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{BridgeError, TransportError};
pub use events::{EventCallback, ListenerId};
pub use retry::RetryPolicy;
pub use stream::StreamController;
pub use transport::{ChannelTransport, Transport};

// Re-export wire types so consumers need a single dependency
pub use conduit_protocol::{codes, Envelope, EnvelopeKind, ErrorPayload, StreamEvent};

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Event emitted after the offline queue has drained on reconnect.
/// Native events with this name, or `DISCONNECTED_EVENT`, are dropped.
pub const CONNECTED_EVENT: &str = "connected";
/// Event emitted when the bridge goes offline.
pub const DISCONNECTED_EVENT: &str = "disconnected";

/// Initialize logging. `RUST_LOG` overrides the default `info` filter.
/// Calling it again once a subscriber is installed is a no-op.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
