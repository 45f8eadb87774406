//! # Message Protocol
//!
//! Inbound shapes shared by both transports.
//!
//! The streaming endpoint sends JSON objects discriminated by a `type` field:
//! - `update`: zero or more snapshot slices, applied with field-level replace.
//! - `prime_found`: a transient discovery notification. It never touches the
//!   snapshot.
//!
//! The polling endpoint returns the body of an `update` without the `type`
//! tag. It has no discovery equivalent.
//!
//! Messages with any other `type` decode to [`ServerMessage::Unknown`] so a
//! newer server cannot break an older client.

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::snapshot::SnapshotUpdate;

/// # Discovery Event
///
/// Payload of a `prime_found` message: the latest individually-reported new
/// result. Held as a single "most recent" value, never queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    /// Form tag of the result (e.g. "factorial", "kbn").
    pub form: String,
    /// Human-readable expression (e.g. "100!+1").
    pub expression: String,
    /// Decimal digit count.
    pub digits: u64,
    /// Occurrence time, Unix milliseconds.
    pub timestamp_ms: i64,
}

/// A message received over the streaming transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Partial or full snapshot state.
    Update(SnapshotUpdate),
    /// A new result was found.
    PrimeFound(DiscoveryEvent),
    /// Any `type` this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Decodes one text frame from the streaming endpoint.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, SyncError> {
    Ok(serde_json::from_str(text)?)
}

/// Decodes one binary frame. The server only ever sends JSON, so a binary
/// frame is treated as UTF-8 encoded JSON.
pub fn decode_server_frame(bytes: &[u8]) -> Result<ServerMessage, SyncError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decodes the body of `GET /api/ws-snapshot`.
///
/// A stray `type` field (some servers reuse the update serializer verbatim)
/// is ignored along with any other unknown key.
pub fn decode_snapshot(body: &str) -> Result<SnapshotUpdate, SyncError> {
    Ok(serde_json::from_str(body)?)
}
