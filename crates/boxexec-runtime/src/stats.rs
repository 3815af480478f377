//! Fleet statistics over the containers this crate owns.

use std::ops::AddAssign;
use std::sync::Arc;

use boxexec_common::constants::{DEADLINE_LABEL, OWNER_LABEL, OWNER_TAG};
use boxexec_common::error::{Result, ResultExt};
use boxexec_common::types::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::RuntimeClient;
use crate::client::{ContainerdClient, LabelFilter, RuntimeContainer, Scope, TaskStatus};

/// Snapshot of container states across the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Tasks running.
    pub running: u64,
    /// Tasks created but not started.
    pub created: u64,
    /// Tasks stopped.
    pub stopped: u64,
    /// Tasks paused.
    pub paused: u64,
    /// Tasks being paused.
    pub pausing: u64,
    /// Tasks in unknown state.
    pub unknown: u64,
    /// Containers whose deadline label lies in the past.
    pub deadline_exceeded: u64,
    /// Containers that could not be inspected.
    pub errors: u64,
}

impl Stats {
    fn record(&mut self, status: &TaskStatus) {
        match status {
            TaskStatus::Running => self.running += 1,
            TaskStatus::Created => self.created += 1,
            TaskStatus::Stopped => self.stopped += 1,
            TaskStatus::Paused => self.paused += 1,
            TaskStatus::Pausing => self.pausing += 1,
            TaskStatus::Unknown => self.unknown += 1,
            TaskStatus::Other(status) => tracing::debug!(status = %status, "stats: ignoring task status"),
        }
    }
}

impl AddAssign for Stats {
    fn add_assign(&mut self, rhs: Self) {
        self.running += rhs.running;
        self.created += rhs.created;
        self.stopped += rhs.stopped;
        self.paused += rhs.paused;
        self.pausing += rhs.pausing;
        self.unknown += rhs.unknown;
        self.deadline_exceeded += rhs.deadline_exceeded;
        self.errors += rhs.errors;
    }
}

/// Collects stats from whichever runtime `client` talks to.
///
/// Only containerd tracks owned containers; docker yields an empty snapshot.
///
/// # Errors
///
/// Returns an error if the containerd container listing fails.
pub fn get_stats(client: &RuntimeClient) -> Result<Stats> {
    match client {
        RuntimeClient::Containerd(c) => collect(c.as_ref()),
        RuntimeClient::Docker(_) => Ok(Stats::default()),
    }
}

/// Lists owned containers in the client's default namespace and counts them.
///
/// # Errors
///
/// Returns an error if listing fails; no partial snapshot is returned.
pub fn collect(client: &dyn ContainerdClient) -> Result<Stats> {
    let scope = Scope::namespace(client.default_namespace());
    let filter = LabelFilter::new(OWNER_LABEL, OWNER_TAG);
    let containers = client
        .containers(&scope, &filter)
        .inspect_err(|e| tracing::warn!(error = %e, "stats: unable to get containers"))
        .context("getting stats")?;
    Ok(process_containers(&containers, Utc::now()))
}

/// Counts deadline and task states of `containers` as of `now`.
#[must_use]
pub fn process_containers(containers: &[Arc<dyn RuntimeContainer>], now: DateTime<Utc>) -> Stats {
    let mut stats = Stats::default();
    for container in containers {
        match container.labels() {
            Ok(labels) => {
                if let Some(deadline) = labels.get(DEADLINE_LABEL) {
                    match parse_timestamp(deadline) {
                        Ok(at) if now > at => stats.deadline_exceeded += 1,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "stats: error parsing time");
                            stats.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(id = %container.id(), error = %e, "stats: error reading labels");
                stats.errors += 1;
            }
        }

        let task = match container.task() {
            Ok(task) => task,
            Err(e) if e.is_not_found() => continue,
            Err(e) => {
                tracing::warn!(id = %container.id(), error = %e, "stats: error getting task");
                stats.errors += 1;
                continue;
            }
        };
        // Only a missing task is skipped; any status failure is an error.
        match task.status() {
            Ok(status) => stats.record(&status),
            Err(e) => {
                tracing::warn!(id = %container.id(), error = %e, "stats: error getting task status");
                stats.errors += 1;
            }
        }
    }
    stats
}
