//! Resumable batch processing against quota-limited providers.
//!
//! - `QuotaLedger`: consumed-vs-available units for the current daily period
//! - `ProgressStore`: crash-safe snapshot of work items plus the ledger
//! - `ResumableRunner`: drives jobs through an executor, one item at a time

pub mod quota;
pub mod runner;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub use quota::{QuotaLedger, Reservation, ResetSchedule};
pub use runner::{
    Clock, FailedItem, Job, JobError, JobExecutor, ResumableRunner, RetryPolicy, RunStop,
    RunSummary, StatusTotals, SystemClock,
};
pub use store::{ProgressStore, SnapshotOrigin, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub key: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub attempts: u32,
    /// Provider result recorded on success, e.g. an uploaded video id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkItem {
    pub fn pending(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: ItemStatus::Pending,
            attempts: 0,
            output: None,
            last_error: None,
        }
    }
}

/// Everything persisted for one progress file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(flatten)]
    pub quota: QuotaLedger,
    #[serde(default)]
    pub items: Vec<WorkItem>,
    /// Run-scoped identifiers that must survive restarts.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl ProgressSnapshot {
    pub fn empty(limit: u64, now: DateTime<Utc>, schedule: ResetSchedule) -> Self {
        Self {
            quota: QuotaLedger::new(limit, now, schedule),
            items: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn item(&self, key: &str) -> Option<&WorkItem> {
        self.items.iter().find(|item| item.key == key)
    }

    pub fn item_mut(&mut self, key: &str) -> &mut WorkItem {
        match self.items.iter().position(|item| item.key == key) {
            Some(idx) => &mut self.items[idx],
            None => {
                self.items.push(WorkItem::pending(key));
                let last = self.items.len() - 1;
                &mut self.items[last]
            }
        }
    }

    pub fn status_of(&self, key: &str) -> Option<ItemStatus> {
        self.item(key).map(|item| item.status)
    }

    /// First key that appears more than once, if any.
    pub fn duplicate_key(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.items
            .iter()
            .find(|item| !seen.insert(item.key.as_str()))
            .map(|item| item.key.as_str())
    }
}

/// Stable idempotency key for one logical action.
pub fn idempotency_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (idx, part) in parts.iter().enumerate() {
        if idx > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
