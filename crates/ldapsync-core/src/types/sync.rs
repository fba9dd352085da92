//! Synchronization run results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRunStats {
    pub total_found: u64,
    pub created: u64,
    pub updated: u64,
    pub deactivated: u64,
    pub errors: u64,
}

impl fmt::Display for SyncRunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "found={} created={} updated={} deactivated={} errors={}",
            self.total_found, self.created, self.updated, self.deactivated, self.errors
        )
    }
}

/// Final state of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Error,
}

/// A finished pass as seen by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: RunStatus,
    pub stats: SyncRunStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Error message when the pass failed as a whole
    pub error: Option<String>,
}
