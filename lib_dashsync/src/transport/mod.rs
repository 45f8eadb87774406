//! # Transports
//!
//! The two acquisition strategies behind one contract.
//!
//! ## Contained Modules:
//! - **`streaming`**: a persistent WebSocket subscription with unbounded,
//!   fixed-delay reconnection. Handles `update` and `prime_found` messages and
//!   forwards client payloads while connected.
//! - **`polling`**: a fixed-interval fetch of the aggregate snapshot endpoint
//!   for deployments that cannot proxy a persistent connection. Receive-only.
//!
//! Both write into a shared [`SyncState`] that they exclusively own for the
//! lifetime of the session. Neither ever returns a connection error to the
//! caller; failures only show up as `connected = false`.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::state::SyncState;

/// Persistent WebSocket subscription.
pub mod streaming;
/// Fixed-interval snapshot polling.
pub mod polling;

pub use polling::PollingTransport;
pub use streaming::StreamingTransport;

/// Which acquisition strategy a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Primary: server pushes over a persistent connection.
    Streaming,
    /// Fallback: client fetches the aggregate snapshot on a fixed interval.
    Polling,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Streaming => f.write_str("streaming"),
            TransportMode::Polling => f.write_str("polling"),
        }
    }
}

/// # Transport
///
/// What every acquisition strategy offers the session. Implementations are
/// started by their own constructors and run until [`teardown`](Transport::teardown).
pub trait Transport: Send + Sync {
    /// The strategy this transport implements.
    fn mode(&self) -> TransportMode;

    /// State written by this transport.
    fn state(&self) -> &Arc<SyncState>;

    /// Forwards an opaque client-to-server payload.
    ///
    /// Best effort: when the transport cannot deliver right now (or never
    /// can), the call returns silently without queuing or failing.
    fn send_message(&self, payload: &Value);

    /// Stops the background loop and closes any connection. Idempotent.
    ///
    /// When this returns, the transport's state will not change again.
    fn teardown(&self);
}
