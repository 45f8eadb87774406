//! # Discovery Event Notifier
//!
//! One-shot "new result found" notifications for UI code, kept apart from the
//! snapshot. Callbacks receive a [`PrimeFoundRecord`], the record shape the
//! dashboard's toast and history widgets consume.
//!
//! Only the latest event is held. A consumer that needs every event must
//! accumulate them in its own callback.

use std::sync::{Arc, Weak};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::protocol::DiscoveryEvent;
use crate::state::{ObserverId, SyncState};

/// Id carried by records built from a live event. The real database id is
/// only known once the records slice catches up.
pub const PLACEHOLDER_ID: i64 = 0;

/// # Prime Found Record
///
/// A discovery event reshaped as a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimeFoundRecord {
    /// Always [`PLACEHOLDER_ID`].
    pub id: i64,
    pub form: String,
    pub expression: String,
    pub digits: u64,
    /// RFC 3339 UTC with millisecond precision, e.g. `2023-11-14T22:13:20.000Z`.
    pub found_at: String,
}

impl From<&DiscoveryEvent> for PrimeFoundRecord {
    fn from(event: &DiscoveryEvent) -> Self {
        Self {
            id: PLACEHOLDER_ID,
            form: event.form.clone(),
            expression: event.expression.clone(),
            digits: event.digits,
            found_at: iso_timestamp(event.timestamp_ms),
        }
    }
}

/// Formats Unix milliseconds as RFC 3339 UTC. Out-of-range values fall back
/// to the current time.
pub fn iso_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// # Discovery Notifier
///
/// Reads the discovery holder of one session's state.
#[derive(Clone)]
pub struct DiscoveryNotifier {
    state: Arc<SyncState>,
}

impl DiscoveryNotifier {
    pub fn new(state: Arc<SyncState>) -> Self {
        Self { state }
    }

    /// Registers `callback` for every future discovery.
    ///
    /// The callback runs on the transport task, before the next inbound
    /// message is processed. It may tear down the session it observes; later
    /// callbacks for the same discovery are then skipped.
    /// The registration lives as long as the returned [`Subscription`].
    pub fn on_prime_found<F>(&self, callback: F) -> Subscription
    where
        F: Fn(PrimeFoundRecord) + Send + Sync + 'static,
    {
        let id = self
            .state
            .add_observer(move |event| callback(PrimeFoundRecord::from(event)));
        Subscription {
            state: Arc::downgrade(&self.state),
            id,
        }
    }

    /// The most recent discovery, if any.
    pub fn latest(&self) -> Option<PrimeFoundRecord> {
        self.state.latest_discovery().as_ref().map(PrimeFoundRecord::from)
    }

    /// Receiver over the raw discovery holder, for async consumers.
    pub fn subscribe(&self) -> watch::Receiver<Option<DiscoveryEvent>> {
        self.state.subscribe_discovery()
    }
}

/// Keeps a discovery callback registered. Dropping it unregisters.
#[must_use = "the callback is removed as soon as the subscription is dropped"]
pub struct Subscription {
    state: Weak<SyncState>,
    id: ObserverId,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Unregisters now. Same as dropping.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.remove_observer(self.id);
        }
    }
}
