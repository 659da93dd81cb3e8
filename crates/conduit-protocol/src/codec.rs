//! JSON text codec
//!
//! Decoding never fails loudly: a peer that sends garbage must not take the
//! bridge down, so malformed input is logged and dropped.

use crate::envelope::Envelope;
use crate::Result;

pub fn encode(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode one envelope, or `None` if the payload is malformed.
pub fn decode(payload: &str) -> Option<Envelope> {
    match serde_json::from_str::<Envelope>(payload) {
        Ok(envelope) if envelope.id.is_empty() => {
            tracing::warn!("Dropping inbound envelope with empty id");
            None
        }
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::warn!(
                error = %e,
                len = payload.len(),
                "Dropping malformed inbound envelope"
            );
            None
        }
    }
}
