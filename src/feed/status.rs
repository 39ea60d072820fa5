//! Status/heartbeat artifact.
//!
//! A small JSON document for external monitoring, rewritten atomically at the
//! end of every cycle and periodically while sleeping. Nothing in the process
//! reads it back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::feed::cache::write_atomic;
use crate::feed::types::CycleStatistics;
use crate::Result;

/// Process state reported in the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Inside the poll loop.
    Running,
    /// Shut down.
    Stopped,
}

/// Activity counters accumulated since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityCounters {
    /// Accepted deliveries (item × destination).
    pub items_delivered: u64,
    /// Feeds whose fetch failed after all retries.
    pub fetch_failures: u64,
    /// Failed deliveries (item × destination).
    pub delivery_failures: u64,
    /// New items dropped by a content filter.
    pub items_filtered: u64,
}

impl ActivityCounters {
    /// Add another set of counters.
    pub fn add(&mut self, other: &ActivityCounters) {
        self.items_delivered += other.items_delivered;
        self.fetch_failures += other.fetch_failures;
        self.delivery_failures += other.delivery_failures;
        self.items_filtered += other.items_filtered;
    }
}

/// The serialized artifact.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    /// Process id.
    pub pid: u32,
    /// Lifecycle state.
    pub state: ProcessState,
    /// Feeds seen in the last cycle.
    pub feed_count: usize,
    /// Process start time.
    pub started_at: DateTime<Utc>,
    /// Time of this record.
    pub updated_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_secs: u64,
    /// Completed cycles.
    pub cycles: u64,
    /// Statistics of the last completed cycle.
    pub last_cycle: CycleStatistics,
    /// Totals since start.
    #[serde(flatten)]
    pub counters: ActivityCounters,
}

/// Tracks process health and writes the status artifact.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    path: PathBuf,
    pid: u32,
    started_at: DateTime<Utc>,
    feed_count: usize,
    cycles: u64,
    last_cycle: CycleStatistics,
    counters: ActivityCounters,
}

impl StatusTracker {
    /// Start tracking; the start time is now.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pid: std::process::id(),
            started_at: Utc::now(),
            feed_count: 0,
            cycles: 0,
            last_cycle: CycleStatistics::default(),
            counters: ActivityCounters::default(),
        }
    }

    /// Artifact location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Counters accumulated so far.
    pub fn counters(&self) -> &ActivityCounters {
        &self.counters
    }

    /// Record a finished cycle.
    pub fn record_cycle(&mut self, stats: CycleStatistics, activity: &ActivityCounters) {
        self.cycles += 1;
        self.feed_count = stats.total;
        self.last_cycle = stats;
        self.counters.add(activity);
    }

    /// Current record.
    pub fn snapshot(&self, state: ProcessState) -> StatusRecord {
        let now = Utc::now();
        StatusRecord {
            pid: self.pid,
            state,
            feed_count: self.feed_count,
            started_at: self.started_at,
            updated_at: now,
            uptime_secs: (now - self.started_at).num_seconds().max(0) as u64,
            cycles: self.cycles,
            last_cycle: self.last_cycle,
            counters: self.counters,
        }
    }

    /// Write the current record.
    pub fn write(&self, state: ProcessState) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot(state))?;
        write_atomic(&self.path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_initial_record() {
        let dir = TempDir::new().unwrap();
        let tracker = StatusTracker::new(dir.path().join("data/status.json"));
        tracker.write(ProcessState::Running).unwrap();

        let value = read(tracker.path());
        assert_eq!(value["pid"], std::process::id());
        assert_eq!(value["state"], "running");
        assert_eq!(value["cycles"], 0);
        assert_eq!(value["feed_count"], 0);
        assert_eq!(value["items_delivered"], 0);
        assert!(value["started_at"].is_string());
        assert!(value["uptime_secs"].is_u64());
    }

    #[test]
    fn test_record_cycle_accumulates() {
        let dir = TempDir::new().unwrap();
        let mut tracker = StatusTracker::new(dir.path().join("status.json"));

        let stats = CycleStatistics {
            total: 4,
            updated: 2,
            filtered: 1,
            failed: 1,
        };
        let activity = ActivityCounters {
            items_delivered: 3,
            fetch_failures: 1,
            delivery_failures: 0,
            items_filtered: 1,
        };
        tracker.record_cycle(stats, &activity);
        tracker.record_cycle(stats, &activity);
        tracker.write(ProcessState::Stopped).unwrap();

        let value = read(tracker.path());
        assert_eq!(value["state"], "stopped");
        assert_eq!(value["cycles"], 2);
        assert_eq!(value["feed_count"], 4);
        assert_eq!(value["last_cycle"]["updated"], 2);
        assert_eq!(value["items_delivered"], 6);
        assert_eq!(value["fetch_failures"], 2);
        assert_eq!(value["items_filtered"], 2);
    }

    #[test]
    fn test_rewrite_leaves_only_artifact() {
        let dir = TempDir::new().unwrap();
        let tracker = StatusTracker::new(dir.path().join("status.json"));
        tracker.write(ProcessState::Running).unwrap();
        tracker.write(ProcessState::Running).unwrap();

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
