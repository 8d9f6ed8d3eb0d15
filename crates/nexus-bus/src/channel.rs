//! Channel names and payload encoding

use nexus_core::{NexusError, NexusResult};

/// Postgres identifiers are truncated past this length
const MAX_CHANNEL_LEN: usize = 63;

/// Hard cap of the NOTIFY payload in the default server build
pub const NOTIFY_PAYLOAD_CAP: usize = 8000;

/// Check that a channel name is a plain identifier
pub fn validate_channel(name: &str) -> NexusResult<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_CHANNEL_LEN {
        Ok(())
    } else {
        Err(NexusError::InvalidChannel(name.to_string()))
    }
}

/// Serialize a message for broadcast, rejecting anything over `limit` bytes.
///
/// Oversized payloads are never truncated or sent partially.
pub fn encode_payload(
    channel: &str,
    message: &serde_json::Value,
    limit: usize,
) -> NexusResult<String> {
    let payload = serde_json::to_string(message)?;
    let limit = limit.min(NOTIFY_PAYLOAD_CAP);

    if payload.len() > limit {
        return Err(NexusError::PayloadTooLarge {
            channel: channel.to_string(),
            size: payload.len(),
            limit,
        });
    }

    Ok(payload)
}
