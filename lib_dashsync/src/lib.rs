//! # lib_dashsync
//!
//! Transport abstraction and state reconciliation for the operations
//! dashboard. One [`DashboardSession`] owns the canonical snapshot, runs
//! either the streaming or the polling transport, and exposes the same
//! consumption contract whichever one is active.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod error;
pub mod notifier;
pub mod protocol;
pub mod retrieve;
pub mod scheduler;
pub mod selector;
pub mod snapshot;
pub mod state;
pub mod transport;

// Re-export the consumption surface
pub use configs::{parse_flag, SyncConfig};
pub use error::SyncError;
pub use notifier::{DiscoveryNotifier, PrimeFoundRecord, Subscription};
pub use protocol::{DiscoveryEvent, ServerMessage};
pub use selector::{ActiveTransport, DashboardSession, DashboardView};
pub use snapshot::{Slice, Snapshot, SnapshotUpdate};
pub use state::SyncState;
pub use transport::{Transport, TransportMode};
