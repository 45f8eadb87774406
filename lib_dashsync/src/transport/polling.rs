//! # Polling Transport
//!
//! The fallback for deployments that cannot proxy a persistent connection.
//! It emulates the streaming contract with one `GET` against the aggregate
//! snapshot endpoint per interval.
//!
//! ## Key Design Principles:
//! - **Immediate first fetch**: the first cycle runs on activation, then one
//!   cycle per fixed interval until teardown. Cycles never overlap. A slow
//!   response delays the next tick instead of stacking requests.
//! - **Latest cycle wins**: `connected` is the outcome of the most recent
//!   cycle only. A 2xx response that decodes sets it `true`. A network error
//!   or non-2xx status sets it `false` and leaves the snapshot alone.
//! - **Same merge rule**: the body is an `update` payload without the `type`
//!   tag, applied with the same field-level replace as the streaming path.
//! - **Receive only**: there is no outbound channel, so `send_message` never
//!   touches the network.
//! - **Optional discovery synthesis**: with `synthesize_discoveries` on, record
//!   ids that appear between two consecutive snapshots are raised as
//!   discovery events (see [`RecordTracker`]).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::configs::SyncConfig;
use crate::error::SyncError;
use crate::protocol::{decode_snapshot, DiscoveryEvent};
use crate::retrieve::ApiClient;
use crate::scheduler::ScheduledTask;
use crate::snapshot::{Identified, PrimeRecord, RecordId, SnapshotUpdate};
use crate::state::SyncState;
use crate::transport::{Transport, TransportMode};

/// # Poll Outcome
///
/// What one fetch cycle produced, before it is applied to the state.
#[derive(Debug)]
pub enum PollOutcome {
    /// 2xx with a body that decoded.
    Snapshot(SnapshotUpdate),
    /// 2xx with a body that did not decode. Dropped.
    Undecodable(SyncError),
    /// Non-2xx status.
    Rejected(u16),
    /// The request never produced a response (refused, timed out, reset).
    Unreachable(SyncError),
}

/// # Record Tracker
///
/// Diffs the `records` slice between consecutive successful cycles.
///
/// The first observation only stores a baseline. After that, every id that
/// was not in the previous observation becomes a [`DiscoveryEvent`]. The
/// stored set is replaced on each observation, so a record that disappears
/// and comes back is reported again.
#[derive(Debug, Default)]
pub struct RecordTracker {
    seen: Option<HashSet<RecordId>>,
}

impl RecordTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns events for records not present last time, in payload order.
    pub fn observe(&mut self, records: &[PrimeRecord]) -> Vec<DiscoveryEvent> {
        let current: HashSet<RecordId> = records.iter().map(|r| r.id().clone()).collect();
        let events = match &self.seen {
            None => Vec::new(),
            Some(previous) => records
                .iter()
                .filter(|r| !previous.contains(r.id()))
                .map(discovery_from_record)
                .collect(),
        };
        self.seen = Some(current);
        events
    }
}

/// Builds a discovery event from a polled record. `found_at` must be RFC 3339;
/// anything else falls back to the current time.
fn discovery_from_record(record: &PrimeRecord) -> DiscoveryEvent {
    let timestamp_ms = record
        .found_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.timestamp_millis())
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    DiscoveryEvent {
        form: record.form.clone(),
        expression: record.expression.clone(),
        digits: record.digits,
        timestamp_ms,
    }
}

/// Fixed-interval snapshot poller.
pub struct PollingTransport {
    endpoint: String,
    state: Arc<SyncState>,
    task: ScheduledTask,
}

impl PollingTransport {
    /// Starts polling `path` (joined onto the client's base URL) every
    /// `every`, with the first fetch issued right away.
    pub fn spawn(
        client: ApiClient,
        path: impl Into<String>,
        every: Duration,
        synthesize_discoveries: bool,
        state: Arc<SyncState>,
    ) -> Self {
        let path = path.into();
        let endpoint = client
            .base_url()
            .join(&path)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| path.clone());
        let worker = PollLoop {
            client,
            path,
            every,
            state: Arc::clone(&state),
            tracker: synthesize_discoveries.then(RecordTracker::new),
        };
        let task = ScheduledTask::spawn("snapshot-poll", move |token| worker.run(token));
        Self {
            endpoint,
            state,
            task,
        }
    }

    /// Builds the HTTP client from `config` and starts polling.
    pub fn from_config(config: &SyncConfig, state: Arc<SyncState>) -> Result<Self, SyncError> {
        // Fail early on an unusable base or path.
        config.snapshot_url()?;
        let client = ApiClient::new(&config.base_url, config.auth_token.clone(), config.request_timeout())?;
        Ok(Self::spawn(
            client,
            config.snapshot_path.clone(),
            config.poll_interval(),
            config.synthesize_discoveries,
            state,
        ))
    }

    /// The absolute URL being polled.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Waits for the background loop to exit (after [`Transport::teardown`]).
    pub async fn join(&self) {
        self.task.join().await;
    }
}

impl Transport for PollingTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Polling
    }

    fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    fn send_message(&self, _payload: &Value) {
        log::trace!("Polling transport is receive-only; client message dropped.");
    }

    fn teardown(&self) {
        if self.state.close() {
            log::info!("Tearing down polling transport for {}", self.endpoint);
        }
        self.task.cancel();
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct PollLoop {
    client: ApiClient,
    path: String,
    every: Duration,
    state: Arc<SyncState>,
    tracker: Option<RecordTracker>,
}

impl PollLoop {
    /// # Main Execution Loop
    ///
    /// 1. **Wait for tick**: the first tick completes immediately.
    /// 2. **Fetch**: one attempt, abandoned if teardown lands mid-request.
    /// 3. **Apply**: fold the outcome into the state.
    async fn run(mut self, token: CancellationToken) {
        log::info!(
            "Polling transport started: {} every {} ms.",
            self.path,
            self.every.as_millis()
        );
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // --- Phase 1: Wait for the next slot ---
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // --- Phase 2: Execute poll ---
            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.execute_poll() => outcome,
            };

            // --- Phase 3: Apply ---
            self.apply(outcome);
        }
        log::info!("Polling transport stopped.");
    }

    async fn execute_poll(&self) -> PollOutcome {
        match self.client.get(&self.path).await {
            Ok(res) if res.success => match decode_snapshot(&res.body) {
                Ok(update) => PollOutcome::Snapshot(update),
                Err(e) => PollOutcome::Undecodable(e),
            },
            Ok(res) => PollOutcome::Rejected(res.status),
            Err(e) => PollOutcome::Unreachable(e),
        }
    }

    fn apply(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Snapshot(update) => {
                let discoveries = match (&mut self.tracker, &update.records) {
                    (Some(tracker), Some(records)) => tracker.observe(records),
                    _ => Vec::new(),
                };
                self.state.apply_update(update);
                if self.state.set_connected(true) {
                    log::info!("Snapshot endpoint reachable again.");
                }
                for event in discoveries {
                    log::info!(
                        "Discovery (polled): {} [{}] ({} digits)",
                        event.expression,
                        event.form,
                        event.digits
                    );
                    self.state.record_discovery(event);
                }
            }
            PollOutcome::Undecodable(e) => {
                log::warn!("Dropping undecodable snapshot body: {}", e);
            }
            PollOutcome::Rejected(status) => {
                log::warn!("Snapshot poll returned HTTP {}.", status);
                self.state.set_connected(false);
            }
            PollOutcome::Unreachable(e) => {
                log::warn!("Snapshot poll failed: {}", e);
                self.state.set_connected(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: i64, found_at: Option<&str>) -> PrimeRecord {
        serde_json::from_value(json!({
            "id": id,
            "form": "factorial",
            "expression": format!("{}!+1", id),
            "digits": id,
            "found_at": found_at,
        }))
        .unwrap()
    }

    #[test]
    fn first_observation_is_a_baseline() {
        let mut tracker = RecordTracker::new();
        assert!(tracker.observe(&[record(1, None), record(2, None)]).is_empty());
    }

    #[test]
    fn new_ids_become_events_in_order() {
        let mut tracker = RecordTracker::new();
        tracker.observe(&[record(1, None)]);
        let events = tracker.observe(&[
            record(3, Some("2023-11-14T22:13:20.000Z")),
            record(1, None),
            record(2, Some("not a date")),
        ]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].expression, "3!+1");
        assert_eq!(events[0].timestamp_ms, 1_700_000_000_000);
        assert_eq!(events[1].expression, "2!+1");
        assert!(events[1].timestamp_ms > 1_700_000_000_000);
    }

    #[test]
    fn seen_set_is_replaced_each_cycle() {
        let mut tracker = RecordTracker::new();
        tracker.observe(&[record(1, None)]);
        tracker.observe(&[]);
        assert_eq!(tracker.observe(&[record(1, None)]).len(), 1);
    }

    fn poll_loop(state: Arc<SyncState>, synthesize: bool) -> PollLoop {
        PollLoop {
            client: ApiClient::new("http://127.0.0.1:1/", None, Duration::from_secs(1)).unwrap(),
            path: "/api/ws-snapshot".into(),
            every: Duration::from_secs(4),
            state,
            tracker: synthesize.then(RecordTracker::new),
        }
    }

    #[tokio::test]
    async fn outcomes_drive_connected() {
        let state = Arc::new(SyncState::new());
        let mut worker = poll_loop(Arc::clone(&state), false);

        worker.apply(PollOutcome::Rejected(500));
        assert!(!state.is_connected());

        let update = decode_snapshot(r#"{"status":{"total":7}}"#).unwrap();
        worker.apply(PollOutcome::Snapshot(update));
        assert!(state.is_connected());

        worker.apply(PollOutcome::Undecodable(decode_snapshot("<html>").unwrap_err()));
        assert!(state.is_connected());

        worker.apply(PollOutcome::Rejected(503));
        assert!(!state.is_connected());
        assert_eq!(state.snapshot().status.unwrap().total, 7);
    }

    #[tokio::test]
    async fn synthesis_is_opt_in() {
        let body_a = r#"{"records":[{"id":1}]}"#;
        let body_b = r#"{"records":[{"id":1},{"id":2,"form":"kbn"}]}"#;

        let quiet = Arc::new(SyncState::new());
        let mut worker = poll_loop(Arc::clone(&quiet), false);
        worker.apply(PollOutcome::Snapshot(decode_snapshot(body_a).unwrap()));
        worker.apply(PollOutcome::Snapshot(decode_snapshot(body_b).unwrap()));
        assert!(quiet.latest_discovery().is_none());

        let loud = Arc::new(SyncState::new());
        let mut worker = poll_loop(Arc::clone(&loud), true);
        worker.apply(PollOutcome::Snapshot(decode_snapshot(body_a).unwrap()));
        assert!(loud.latest_discovery().is_none());
        worker.apply(PollOutcome::Snapshot(decode_snapshot(body_b).unwrap()));
        assert_eq!(loud.latest_discovery().unwrap().form, "kbn");
    }
}
