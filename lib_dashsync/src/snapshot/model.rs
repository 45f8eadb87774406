//! # Domain Slice Models
//!
//! Strongly-typed representations of the values carried in each snapshot
//! slice. The server owns these shapes and is free to add fields, so every
//! model keeps whatever it does not recognise in a flattened `extra` map
//! instead of rejecting the payload. Known fields default when missing,
//! when `null`, or when they arrive with a shape this client does not expect,
//! so one odd sub-field never costs the rest of the record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// # Record Identifier
///
/// Stable identifier of a row in one of the sequence slices. The backend uses
/// integer keys for most tables and text keys for a few (worker ids, slugs),
/// so both forms are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Integer primary key.
    Number(i64),
    /// Text key (uuid, slug, worker id).
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Number(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// Implemented by every record type held in a sequence slice.
pub trait Identified {
    /// The record's stable identifier.
    fn id(&self) -> &RecordId;
}

/// Decodes a modelled field, falling back to `T::default()` when the value
/// is `null` or the wrong shape. A float sent for an integer field is
/// truncated before giving up on it.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    if let Ok(parsed) = T::deserialize(&value) {
        return Ok(parsed);
    }
    let truncated = value
        .as_f64()
        .filter(|f| f.is_finite())
        .map(|f| Value::from(f.trunc() as i64));
    Ok(truncated
        .and_then(|v| T::deserialize(&v).ok())
        .unwrap_or_default())
}

macro_rules! identified {
    ($($ty:ty),+ $(,)?) => {
        $(impl Identified for $ty {
            fn id(&self) -> &RecordId {
                &self.id
            }
        })+
    };
}

/// # Status Summary
///
/// Scalar aggregate counters shown in the dashboard header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSummary {
    /// Total number of results found so far.
    #[serde(deserialize_with = "lenient")]
    pub total: u64,
    /// Coordinator uptime in seconds.
    #[serde(deserialize_with = "lenient")]
    pub uptime_secs: Option<u64>,
    /// Searches currently in a running state.
    #[serde(deserialize_with = "lenient")]
    pub active_searches: Option<u64>,
    /// Workers that reported a heartbeat recently.
    #[serde(deserialize_with = "lenient")]
    pub workers_online: Option<u64>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// # Fleet
///
/// Roster of the workers and servers currently attached to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fleet {
    /// One entry per connected worker process.
    #[serde(deserialize_with = "lenient")]
    pub workers: Vec<WorkerStatus>,
    /// Total worker count as reported by the coordinator.
    #[serde(deserialize_with = "lenient")]
    pub total_workers: Option<u64>,
    /// Sum of cores across the fleet.
    #[serde(deserialize_with = "lenient")]
    pub total_cores: Option<u64>,
    /// Candidates tested across the fleet.
    #[serde(deserialize_with = "lenient")]
    pub total_tested: Option<u64>,
    /// Results found across the fleet.
    #[serde(deserialize_with = "lenient")]
    pub total_found: Option<u64>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single worker's last heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerStatus {
    #[serde(deserialize_with = "lenient")]
    pub worker_id: String,
    #[serde(deserialize_with = "lenient")]
    pub hostname: String,
    #[serde(deserialize_with = "lenient")]
    pub cores: u64,
    #[serde(deserialize_with = "lenient")]
    pub search_type: String,
    #[serde(deserialize_with = "lenient")]
    pub current: String,
    #[serde(deserialize_with = "lenient")]
    pub tested: u64,
    #[serde(deserialize_with = "lenient")]
    pub found: u64,
    #[serde(deserialize_with = "lenient")]
    pub uptime_secs: u64,
    #[serde(deserialize_with = "lenient")]
    pub last_heartbeat_secs_ago: Option<u64>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// # Coordinator Metrics
///
/// Point-in-time hardware metrics for the orchestrating node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorMetrics {
    #[serde(deserialize_with = "lenient")]
    pub cpu_usage_percent: f64,
    #[serde(deserialize_with = "lenient")]
    pub memory_used_gb: f64,
    #[serde(deserialize_with = "lenient")]
    pub memory_total_gb: f64,
    #[serde(deserialize_with = "lenient")]
    pub memory_usage_percent: f64,
    #[serde(deserialize_with = "lenient")]
    pub disk_used_gb: f64,
    #[serde(deserialize_with = "lenient")]
    pub disk_total_gb: f64,
    #[serde(deserialize_with = "lenient")]
    pub disk_usage_percent: f64,
    #[serde(deserialize_with = "lenient")]
    pub load_avg_1m: f64,
    #[serde(deserialize_with = "lenient")]
    pub load_avg_5m: f64,
    #[serde(deserialize_with = "lenient")]
    pub load_avg_15m: f64,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A search managed by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Search {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub search_type: String,
    #[serde(default, deserialize_with = "lenient")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient")]
    pub params: Value,
    #[serde(default, deserialize_with = "lenient")]
    pub tested: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub found: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub started_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A distributed job split into work blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchJob {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub search_type: String,
    #[serde(default, deserialize_with = "lenient")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient")]
    pub range_start: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub range_end: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub blocks_total: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub blocks_done: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A worker deployment on a remote host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub hostname: String,
    #[serde(default, deserialize_with = "lenient")]
    pub search_type: String,
    #[serde(default, deserialize_with = "lenient")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient")]
    pub started_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An operator-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient")]
    pub details: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub count: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp_ms: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A task queued for or handled by an autonomous agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub agent_model: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Spend limits for agent work over one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentBudget {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub period: String,
    #[serde(default, deserialize_with = "lenient")]
    pub budget_usd: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub spent_usd: f64,
    #[serde(default, deserialize_with = "lenient")]
    pub tokens_used: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An agent process that is executing right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningAgent {
    /// Keyed by the task the agent is working on.
    #[serde(alias = "task_id")]
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub started_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub pid: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A long-running research project grouping several searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub slug: String,
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub form: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// # Prime Record
///
/// A persisted discovery as listed in the `records` slice. Unlike the
/// `prime_found` push event, this carries the authoritative identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimeRecord {
    pub id: RecordId,
    #[serde(default, deserialize_with = "lenient")]
    pub form: String,
    #[serde(default, deserialize_with = "lenient")]
    pub expression: String,
    #[serde(default, deserialize_with = "lenient")]
    pub digits: u64,
    /// RFC 3339 timestamp of the discovery.
    #[serde(default, deserialize_with = "lenient")]
    pub found_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub proof_method: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

identified!(
    Search,
    SearchJob,
    Deployment,
    Notification,
    AgentTask,
    AgentBudget,
    RunningAgent,
    Project,
    PrimeRecord,
);
