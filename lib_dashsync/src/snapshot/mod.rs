//! # Snapshot Model
//!
//! The canonical in-memory picture of the dashboard: one optional value per
//! named slice. A slice stays `None` until the first message that carries it.
//!
//! ## Merge rule
//! Incoming data arrives as a [`SnapshotUpdate`], which has the same slices as
//! the [`Snapshot`]. Applying an update is a **field-level replace**: every
//! slice present in the update overwrites the stored slice wholesale, and
//! every absent slice is left exactly as it was. There is no deep merge inside
//! a slice and no atomic rollback across slices, since slices are independent
//! domains.
//!
//! On the wire, a slice sent as JSON `null` is treated the same as an omitted
//! slice. Slices are also decoded independently: a slice whose value cannot
//! be decoded at all is logged and skipped, and the rest of the update still
//! applies.

pub mod model;

pub use model::{
    AgentBudget, AgentTask, CoordinatorMetrics, Deployment, Fleet, Identified, Notification,
    PrimeRecord, Project, RecordId, RunningAgent, Search, SearchJob, StatusSummary, WorkerStatus,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Names of the independently-updatable regions of the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    Status,
    Fleet,
    Coordinator,
    Searches,
    SearchJobs,
    Deployments,
    Notifications,
    AgentTasks,
    AgentBudgets,
    RunningAgents,
    Projects,
    Records,
}

impl Slice {
    /// Every slice, in contract order.
    pub const ALL: [Slice; 12] = [
        Slice::Status,
        Slice::Fleet,
        Slice::Coordinator,
        Slice::Searches,
        Slice::SearchJobs,
        Slice::Deployments,
        Slice::Notifications,
        Slice::AgentTasks,
        Slice::AgentBudgets,
        Slice::RunningAgents,
        Slice::Projects,
        Slice::Records,
    ];

    /// The field name used on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            Slice::Status => "status",
            Slice::Fleet => "fleet",
            Slice::Coordinator => "coordinator",
            Slice::Searches => "searches",
            Slice::SearchJobs => "search_jobs",
            Slice::Deployments => "deployments",
            Slice::Notifications => "notifications",
            Slice::AgentTasks => "agent_tasks",
            Slice::AgentBudgets => "agent_budgets",
            Slice::RunningAgents => "running_agents",
            Slice::Projects => "projects",
            Slice::Records => "records",
        }
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// # Snapshot
///
/// Current value of every slice. Owned and mutated only by the active
/// transport; everybody else reads clones of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
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
}

impl Snapshot {
    /// Slices that have been received at least once.
    pub fn received_slices(&self) -> Vec<Slice> {
        Slice::ALL
            .into_iter()
            .filter(|slice| self.has(*slice))
            .collect()
    }

    /// Whether the given slice has been received.
    pub fn has(&self, slice: Slice) -> bool {
        match slice {
            Slice::Status => self.status.is_some(),
            Slice::Fleet => self.fleet.is_some(),
            Slice::Coordinator => self.coordinator.is_some(),
            Slice::Searches => self.searches.is_some(),
            Slice::SearchJobs => self.search_jobs.is_some(),
            Slice::Deployments => self.deployments.is_some(),
            Slice::Notifications => self.notifications.is_some(),
            Slice::AgentTasks => self.agent_tasks.is_some(),
            Slice::AgentBudgets => self.agent_budgets.is_some(),
            Slice::RunningAgents => self.running_agents.is_some(),
            Slice::Projects => self.projects.is_some(),
            Slice::Records => self.records.is_some(),
        }
    }
}

/// # Snapshot Update
///
/// The payload of an `update` message and of the polling endpoint. Each
/// field that is `Some` replaces the matching slice; `None` means "unchanged".
///
/// Field names are snake_case on the wire. The camelCase spellings used by
/// the browser contract are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawUpdate")]
pub struct SnapshotUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet: Option<Fleet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searches: Option<Vec<Search>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_jobs: Option<Vec<SearchJob>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployments: Option<Vec<Deployment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Vec<Notification>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_tasks: Option<Vec<AgentTask>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_budgets: Option<Vec<AgentBudget>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_agents: Option<Vec<RunningAgent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<Project>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<PrimeRecord>>,
}

/// Wire shape of an update before each slice is decoded on its own.
#[derive(Deserialize)]
struct RawUpdate {
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    fleet: Option<Value>,
    #[serde(default)]
    coordinator: Option<Value>,
    #[serde(default)]
    searches: Option<Value>,
    #[serde(default, alias = "searchJobs")]
    search_jobs: Option<Value>,
    #[serde(default)]
    deployments: Option<Value>,
    #[serde(default)]
    notifications: Option<Value>,
    #[serde(default, alias = "agentTasks")]
    agent_tasks: Option<Value>,
    #[serde(default, alias = "agentBudgets")]
    agent_budgets: Option<Value>,
    #[serde(default, alias = "runningAgents")]
    running_agents: Option<Value>,
    #[serde(default)]
    projects: Option<Value>,
    #[serde(default)]
    records: Option<Value>,
}

fn decode_slice<T: DeserializeOwned>(slice: Slice, raw: Option<Value>) -> Option<T> {
    match serde_json::from_value(raw?) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Skipping undecodable '{}' slice: {}", slice, e);
            None
        }
    }
}

impl From<RawUpdate> for SnapshotUpdate {
    fn from(raw: RawUpdate) -> Self {
        Self {
            status: decode_slice(Slice::Status, raw.status),
            fleet: decode_slice(Slice::Fleet, raw.fleet),
            coordinator: decode_slice(Slice::Coordinator, raw.coordinator),
            searches: decode_slice(Slice::Searches, raw.searches),
            search_jobs: decode_slice(Slice::SearchJobs, raw.search_jobs),
            deployments: decode_slice(Slice::Deployments, raw.deployments),
            notifications: decode_slice(Slice::Notifications, raw.notifications),
            agent_tasks: decode_slice(Slice::AgentTasks, raw.agent_tasks),
            agent_budgets: decode_slice(Slice::AgentBudgets, raw.agent_budgets),
            running_agents: decode_slice(Slice::RunningAgents, raw.running_agents),
            projects: decode_slice(Slice::Projects, raw.projects),
            records: decode_slice(Slice::Records, raw.records),
        }
    }
}

/// Moves `incoming` into `slot` when present. Returns whether it did.
fn replace<T>(slot: &mut Option<T>, incoming: Option<T>) -> bool {
    match incoming {
        Some(value) => {
            *slot = Some(value);
            true
        }
        None => false,
    }
}

impl SnapshotUpdate {
    /// Slices this update carries.
    pub fn present_slices(&self) -> Vec<Slice> {
        let mut out = Vec::new();
        let flags = [
            (Slice::Status, self.status.is_some()),
            (Slice::Fleet, self.fleet.is_some()),
            (Slice::Coordinator, self.coordinator.is_some()),
            (Slice::Searches, self.searches.is_some()),
            (Slice::SearchJobs, self.search_jobs.is_some()),
            (Slice::Deployments, self.deployments.is_some()),
            (Slice::Notifications, self.notifications.is_some()),
            (Slice::AgentTasks, self.agent_tasks.is_some()),
            (Slice::AgentBudgets, self.agent_budgets.is_some()),
            (Slice::RunningAgents, self.running_agents.is_some()),
            (Slice::Projects, self.projects.is_some()),
            (Slice::Records, self.records.is_some()),
        ];
        for (slice, present) in flags {
            if present {
                out.push(slice);
            }
        }
        out
    }

    /// True when the update carries no slice at all.
    pub fn is_empty(&self) -> bool {
        self.present_slices().is_empty()
    }

    /// Applies the field-level replace rule to `snapshot`.
    ///
    /// Returns `true` if at least one slice was written. A slice is counted as
    /// written even when the new value equals the old one.
    pub fn apply_to(self, snapshot: &mut Snapshot) -> bool {
        let mut changed = false;
        changed |= replace(&mut snapshot.status, self.status);
        changed |= replace(&mut snapshot.fleet, self.fleet);
        changed |= replace(&mut snapshot.coordinator, self.coordinator);
        changed |= replace(&mut snapshot.searches, self.searches);
        changed |= replace(&mut snapshot.search_jobs, self.search_jobs);
        changed |= replace(&mut snapshot.deployments, self.deployments);
        changed |= replace(&mut snapshot.notifications, self.notifications);
        changed |= replace(&mut snapshot.agent_tasks, self.agent_tasks);
        changed |= replace(&mut snapshot.agent_budgets, self.agent_budgets);
        changed |= replace(&mut snapshot.running_agents, self.running_agents);
        changed |= replace(&mut snapshot.projects, self.projects);
        changed |= replace(&mut snapshot.records, self.records);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(total: u64) -> StatusSummary {
        StatusSummary {
            total,
            ..Default::default()
        }
    }

    /// A snapshot where every slice holds a recognisable "old" value.
    fn populated() -> Snapshot {
        serde_json::from_value::<SnapshotUpdate>(json!({
            "status": { "total": 1 },
            "fleet": { "workers": [{ "worker_id": "old", "hostname": "h0" }] },
            "coordinator": { "cpu_usage_percent": 10.0 },
            "searches": [{ "id": 1 }],
            "search_jobs": [{ "id": 1 }],
            "deployments": [{ "id": 1 }],
            "notifications": [{ "id": 1 }],
            "agent_tasks": [{ "id": 1 }],
            "agent_budgets": [{ "id": 1 }],
            "running_agents": [{ "id": 1 }],
            "projects": [{ "id": 1 }],
            "records": [{ "id": 1 }]
        }))
        .map(|update| {
            let mut snap = Snapshot::default();
            update.apply_to(&mut snap);
            snap
        })
        .unwrap()
    }

    /// Builds an update carrying the "new" value for exactly the slices in `mask`.
    fn update_for(mask: u16) -> SnapshotUpdate {
        let mut body = serde_json::Map::new();
        let new_values = [
            json!({ "total": 2 }),
            json!({ "workers": [{ "worker_id": "new", "hostname": "h1" }] }),
            json!({ "cpu_usage_percent": 90.0 }),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
            json!([{ "id": 2 }]),
        ];
        for (bit, (slice, value)) in Slice::ALL.iter().zip(new_values).enumerate() {
            if mask & (1 << bit) != 0 {
                body.insert(slice.wire_name().to_string(), value);
            }
        }
        serde_json::from_value(serde_json::Value::Object(body)).unwrap()
    }

    #[test]
    fn field_level_replace_holds_for_every_slice_subset() {
        let old = populated();
        let fresh = {
            let mut snap = Snapshot::default();
            update_for(0x0FFF).apply_to(&mut snap);
            snap
        };

        for mask in 0u16..(1 << Slice::ALL.len()) {
            let update = update_for(mask);
            let present = update.present_slices();
            let mut snap = old.clone();
            let changed = update.apply_to(&mut snap);
            assert_eq!(changed, mask != 0);

            for (bit, slice) in Slice::ALL.iter().enumerate() {
                let expected = if mask & (1 << bit) != 0 { &fresh } else { &old };
                assert!(present.contains(slice) == (mask & (1 << bit) != 0));
                let same = match slice {
                    Slice::Status => snap.status == expected.status,
                    Slice::Fleet => snap.fleet == expected.fleet,
                    Slice::Coordinator => snap.coordinator == expected.coordinator,
                    Slice::Searches => snap.searches == expected.searches,
                    Slice::SearchJobs => snap.search_jobs == expected.search_jobs,
                    Slice::Deployments => snap.deployments == expected.deployments,
                    Slice::Notifications => snap.notifications == expected.notifications,
                    Slice::AgentTasks => snap.agent_tasks == expected.agent_tasks,
                    Slice::AgentBudgets => snap.agent_budgets == expected.agent_budgets,
                    Slice::RunningAgents => snap.running_agents == expected.running_agents,
                    Slice::Projects => snap.projects == expected.projects,
                    Slice::Records => snap.records == expected.records,
                };
                assert!(same, "slice {} wrong for mask {:#06x}", slice, mask);
            }
        }
    }

    #[test]
    fn status_only_update_leaves_fleet_alone() {
        let mut snap = populated();
        let fleet_before = snap.fleet.clone();
        let update = SnapshotUpdate {
            status: Some(status(42)),
            ..Default::default()
        };
        assert!(update.apply_to(&mut snap));
        assert_eq!(snap.status.as_ref().map(|s| s.total), Some(42));
        assert_eq!(snap.fleet, fleet_before);
    }

    #[test]
    fn null_slice_counts_as_absent() {
        let mut snap = populated();
        let before = snap.clone();
        let update: SnapshotUpdate =
            serde_json::from_value(json!({ "fleet": null, "records": null })).unwrap();
        assert!(update.is_empty());
        assert!(!update.apply_to(&mut snap));
        assert_eq!(snap, before);
    }

    #[test]
    fn camel_case_aliases_are_accepted() {
        let update: SnapshotUpdate = serde_json::from_value(json!({
            "searchJobs": [{ "id": "job-1" }],
            "agentTasks": [],
            "agentBudgets": [],
            "runningAgents": []
        }))
        .unwrap();
        assert_eq!(
            update.present_slices(),
            vec![
                Slice::SearchJobs,
                Slice::AgentTasks,
                Slice::AgentBudgets,
                Slice::RunningAgents
            ]
        );
    }

    #[test]
    fn undecodable_slice_is_skipped_and_the_rest_applies() {
        let mut snap = populated();
        let update: SnapshotUpdate = serde_json::from_value(json!({
            "status": { "total": 42 },
            "deployments": [{ "hostname": "no-id" }],
            "fleet": "not an object"
        }))
        .unwrap();
        assert_eq!(update.present_slices(), vec![Slice::Status]);

        let deployments_before = snap.deployments.clone();
        update.apply_to(&mut snap);
        assert_eq!(snap.status.as_ref().map(|s| s.total), Some(42));
        assert_eq!(snap.deployments, deployments_before);
        assert!(snap.fleet.is_some());
    }

    #[test]
    fn sequence_slice_is_replaced_not_appended() {
        let mut snap = populated();
        let update: SnapshotUpdate =
            serde_json::from_value(json!({ "records": [{ "id": 5 }, { "id": 6 }] })).unwrap();
        update.apply_to(&mut snap);
        let ids: Vec<_> = snap
            .records
            .unwrap()
            .iter()
            .map(|r| r.id().clone())
            .collect();
        assert_eq!(ids, vec![RecordId::Number(5), RecordId::Number(6)]);
    }

    #[test]
    fn received_slices_tracks_first_arrival() {
        let mut snap = Snapshot::default();
        assert!(snap.received_slices().is_empty());
        SnapshotUpdate {
            status: Some(status(1)),
            ..Default::default()
        }
        .apply_to(&mut snap);
        assert_eq!(snap.received_slices(), vec![Slice::Status]);
    }
}
