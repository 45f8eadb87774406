//! # Transport Selector
//!
//! Picks streaming or polling once at session start and hides the choice
//! behind one consumption contract. UI code reads slices, `connected` and
//! discoveries from a [`DashboardSession`] without knowing which transport
//! feeds it.
//!
//! There is no global instance. A session is created with
//! [`DashboardSession::start`], passed around by reference, and ended with
//! [`DashboardSession::teardown`] (or dropped).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::configs::SyncConfig;
use crate::error::SyncError;
use crate::notifier::{DiscoveryNotifier, PrimeFoundRecord, Subscription};
use crate::protocol::DiscoveryEvent;
use crate::snapshot::{
    AgentBudget, AgentTask, CoordinatorMetrics, Deployment, Fleet, Notification, PrimeRecord,
    Project, RunningAgent, Search, SearchJob, Snapshot, StatusSummary,
};
use crate::state::SyncState;
use crate::transport::{PollingTransport, StreamingTransport, Transport, TransportMode};

/// The transport chosen for a session.
pub enum ActiveTransport {
    Streaming(StreamingTransport),
    Polling(PollingTransport),
}

/// Forwards a call to whichever transport is active.
macro_rules! delegate {
    ($self:ident, $t:ident => $call:expr) => {
        match $self {
            ActiveTransport::Streaming($t) => $call,
            ActiveTransport::Polling($t) => $call,
        }
    };
}

impl ActiveTransport {
    /// Starts the transport `config` selects, writing into `state`.
    pub fn start(config: &SyncConfig, state: Arc<SyncState>) -> Result<Self, SyncError> {
        Ok(match config.mode() {
            TransportMode::Streaming => Self::Streaming(StreamingTransport::from_config(config, state)?),
            TransportMode::Polling => Self::Polling(PollingTransport::from_config(config, state)?),
        })
    }

    /// Waits for the background task to exit.
    pub async fn join(&self) {
        delegate!(self, t => t.join().await)
    }
}

impl Transport for ActiveTransport {
    fn mode(&self) -> TransportMode {
        delegate!(self, t => t.mode())
    }

    fn state(&self) -> &Arc<SyncState> {
        delegate!(self, t => t.state())
    }

    fn send_message(&self, payload: &serde_json::Value) {
        delegate!(self, t => t.send_message(payload))
    }

    fn teardown(&self) {
        delegate!(self, t => t.teardown())
    }
}

/// # Dashboard View
///
/// The whole consumption contract at one instant: every slice plus
/// `connected`. Serializes with the browser-facing camelCase names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub status: Option<StatusSummary>,
    pub fleet: Option<Fleet>,
    pub coordinator: Option<CoordinatorMetrics>,
    pub searches: Option<Vec<Search>>,
    pub search_jobs: Option<Vec<SearchJob>>,
    pub deployments: Option<Vec<Deployment>>,
    pub notifications: Option<Vec<Notification>>,
    pub agent_tasks: Option<Vec<AgentTask>>,
    pub agent_budgets: Option<Vec<AgentBudget>>,
    pub running_agents: Option<Vec<RunningAgent>>,
    pub projects: Option<Vec<Project>>,
    pub records: Option<Vec<PrimeRecord>>,
    pub connected: bool,
}

impl DashboardView {
    fn from_parts(snapshot: Snapshot, connected: bool) -> Self {
        Self {
            status: snapshot.status,
            fleet: snapshot.fleet,
            coordinator: snapshot.coordinator,
            searches: snapshot.searches,
            search_jobs: snapshot.search_jobs,
            deployments: snapshot.deployments,
            notifications: snapshot.notifications,
            agent_tasks: snapshot.agent_tasks,
            agent_budgets: snapshot.agent_budgets,
            running_agents: snapshot.running_agents,
            projects: snapshot.projects,
            records: snapshot.records,
            connected,
        }
    }
}

/// # Dashboard Session
///
/// One running transport plus the state it owns.
pub struct DashboardSession {
    state: Arc<SyncState>,
    transport: ActiveTransport,
    notifier: DiscoveryNotifier,
}

impl DashboardSession {
    /// Validates `config` and starts the selected transport. Must be called
    /// inside a tokio runtime.
    ///
    /// # Errors
    /// Only configuration problems (bad URL, zero interval) fail here. A
    /// backend that is down shows up later as `connected() == false`.
    pub fn start(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let state = Arc::new(SyncState::new());
        let transport = ActiveTransport::start(config, Arc::clone(&state))?;
        log::info!("Dashboard session started in {} mode.", transport.mode());
        Ok(Self {
            notifier: DiscoveryNotifier::new(Arc::clone(&state)),
            state,
            transport,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    pub fn transport(&self) -> &ActiveTransport {
        &self.transport
    }

    // --- Consumption contract ---

    pub fn status(&self) -> Option<StatusSummary> {
        self.state.with_snapshot(|s| s.status.clone())
    }

    pub fn fleet(&self) -> Option<Fleet> {
        self.state.with_snapshot(|s| s.fleet.clone())
    }

    pub fn coordinator(&self) -> Option<CoordinatorMetrics> {
        self.state.with_snapshot(|s| s.coordinator.clone())
    }

    pub fn searches(&self) -> Option<Vec<Search>> {
        self.state.with_snapshot(|s| s.searches.clone())
    }

    pub fn search_jobs(&self) -> Option<Vec<SearchJob>> {
        self.state.with_snapshot(|s| s.search_jobs.clone())
    }

    pub fn deployments(&self) -> Option<Vec<Deployment>> {
        self.state.with_snapshot(|s| s.deployments.clone())
    }

    pub fn notifications(&self) -> Option<Vec<Notification>> {
        self.state.with_snapshot(|s| s.notifications.clone())
    }

    pub fn agent_tasks(&self) -> Option<Vec<AgentTask>> {
        self.state.with_snapshot(|s| s.agent_tasks.clone())
    }

    pub fn agent_budgets(&self) -> Option<Vec<AgentBudget>> {
        self.state.with_snapshot(|s| s.agent_budgets.clone())
    }

    pub fn running_agents(&self) -> Option<Vec<RunningAgent>> {
        self.state.with_snapshot(|s| s.running_agents.clone())
    }

    pub fn projects(&self) -> Option<Vec<Project>> {
        self.state.with_snapshot(|s| s.projects.clone())
    }

    pub fn records(&self) -> Option<Vec<PrimeRecord>> {
        self.state.with_snapshot(|s| s.records.clone())
    }

    /// Whether the active transport currently considers itself healthy.
    pub fn connected(&self) -> bool {
        self.state.is_connected()
    }

    /// A clone of the whole snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    /// Every slice plus `connected`, read together.
    pub fn view(&self) -> DashboardView {
        DashboardView::from_parts(self.state.snapshot(), self.state.is_connected())
    }

    /// Sends an opaque payload to the server.
    ///
    /// Never fails. Under polling, or while disconnected, this does nothing.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.transport.send_message(&value),
            Err(e) => log::warn!("Client message is not representable as JSON: {}", e),
        }
    }

    // --- Change notification ---

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Snapshot> {
        self.state.subscribe_snapshot()
    }

    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.state.subscribe_connected()
    }

    pub fn subscribe_discovery(&self) -> watch::Receiver<Option<DiscoveryEvent>> {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &DiscoveryNotifier {
        &self.notifier
    }

    /// Shorthand for `notifier().on_prime_found(callback)`.
    pub fn on_prime_found<F>(&self, callback: F) -> Subscription
    where
        F: Fn(PrimeFoundRecord) + Send + Sync + 'static,
    {
        self.notifier.on_prime_found(callback)
    }

    /// The most recent discovery, if any.
    pub fn latest_discovery(&self) -> Option<PrimeFoundRecord> {
        self.notifier.latest()
    }

    // --- Lifecycle ---

    /// Stops the transport. Idempotent and synchronous: once this returns,
    /// no slice, `connected` or discovery changes and no callback fires.
    pub fn teardown(&self) {
        self.transport.teardown();
    }

    /// Tears down, then waits for the background task to finish closing.
    pub async fn shutdown(&self) {
        self.teardown();
        self.transport.join().await;
        log::info!("Dashboard session shut down.");
    }
}

impl Drop for DashboardSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
