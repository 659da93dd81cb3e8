//! In-process wiring of a bridge to a native host
//!
//! Used by embedders that run both ends in one process, and by tests that
//! want the real dispatch path without a webview.

use conduit_core::{Bridge, BridgeConfig, ChannelTransport};
use tokio::task::JoinHandle;

use crate::host::NativeHost;

/// A connected bridge and host pair. Traffic flows while this is alive.
pub struct Loopback {
    bridge: Bridge,
    host: NativeHost,
    pumps: Vec<JoinHandle<()>>,
}

impl Loopback {
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn host(&self) -> &NativeHost {
        &self.host
    }
}

impl Drop for Loopback {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

/// Build a bridge and a host joined by two channel transports.
/// Must be called within a Tokio runtime.
pub fn connect(config: BridgeConfig) -> Loopback {
    let (to_native, mut native_rx) = ChannelTransport::new();
    let (to_web, mut web_rx) = ChannelTransport::new();

    let bridge = Bridge::new(config, to_native);
    let host = NativeHost::new(to_web);

    let native = host.clone();
    let inbound = tokio::spawn(async move {
        while let Some(payload) = native_rx.recv().await {
            native.handle(&payload);
        }
    });

    let web = bridge.clone();
    let outbound = tokio::spawn(async move {
        while let Some(payload) = web_rx.recv().await {
            web.receive(&payload);
        }
    });

    tracing::debug!("Loopback bridge connected");
    Loopback {
        bridge,
        host,
        pumps: vec![inbound, outbound],
    }
}
