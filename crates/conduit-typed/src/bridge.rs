//! Typed wrapper around `conduit_core::Bridge`

use conduit_core::{Bridge, BridgeError, Result};

use crate::Method;

/// Bridge handle that only accepts registered [`Method`] types.
#[derive(Clone, Debug)]
pub struct TypedBridge {
    bridge: Bridge,
}

impl TypedBridge {
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }

    /// The untyped bridge underneath, for streams, batches and events.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub async fn call<M: Method>(&self, params: M::Params) -> Result<M::Output> {
        let params = serde_json::to_value(params)?;
        let value = self.bridge.request(M::NAME, params).await?;

        serde_json::from_value(value).map_err(|e| {
            tracing::warn!(method = M::NAME, error = %e, "Unexpected result shape");
            BridgeError::Protocol(format!("invalid result for {}: {e}", M::NAME))
        })
    }

    pub fn notify<M: Method>(&self, params: M::Params) -> Result<()> {
        let params = serde_json::to_value(params)?;
        self.bridge.notify(M::NAME, params)
    }
}

impl From<Bridge> for TypedBridge {
    fn from(bridge: Bridge) -> Self {
        Self::new(bridge)
    }
}
