//! One-line renderings of the consumption contract for the log.

use lib_dashsync::{DashboardView, PrimeFoundRecord, TransportMode};

fn count<T>(slice: &Option<Vec<T>>) -> String {
    slice.as_ref().map_or_else(|| "-".to_string(), |items| items.len().to_string())
}

pub fn connection_line(mode: TransportMode, connected: bool) -> String {
    if connected {
        format!("[{}] backend connected", mode)
    } else {
        format!("[{}] backend unreachable; showing last known state", mode)
    }
}

/// Header counters plus the size of every list slice. `-` marks a slice
/// that has not been received yet.
pub fn summary_line(view: &DashboardView) -> String {
    let total = view
        .status
        .as_ref()
        .map_or_else(|| "-".to_string(), |s| s.total.to_string());
    let workers = view
        .fleet
        .as_ref()
        .map_or_else(|| "-".to_string(), |f| f.workers.len().to_string());
    let cpu = view
        .coordinator
        .as_ref()
        .map_or_else(|| "-".to_string(), |c| format!("{:.0}%", c.cpu_usage_percent));

    format!(
        "{} total={} workers={} cpu={} searches={} jobs={} deployments={} notifications={} tasks={} budgets={} agents={} projects={} records={}",
        if view.connected { "LIVE" } else { "STALE" },
        total,
        workers,
        cpu,
        count(&view.searches),
        count(&view.search_jobs),
        count(&view.deployments),
        count(&view.notifications),
        count(&view.agent_tasks),
        count(&view.agent_budgets),
        count(&view.running_agents),
        count(&view.projects),
        count(&view.records),
    )
}

pub fn discovery_line(record: &PrimeFoundRecord) -> String {
    format!(
        "New {} prime: {} ({} digits) at {}",
        record.form, record.expression, record.digits, record.found_at
    )
}
