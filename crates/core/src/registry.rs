//! In-memory registry of runs and their logs.
//!
//! The registry is the only place run records are mutated. Every mutation
//! goes through a single `RwLock` whose critical sections never block, so
//! it is safe to call from async code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::CoreError;
use crate::log_buffer::{LogBuffer, DEFAULT_LOG_CAP};
use crate::run::{RunOutcome, RunSpec, RunStatus, RunSummary};
use crate::types::{new_run_id, RunId, Timestamp};

/// A run together with its full current log.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: RunSummary,
    pub log: String,
}

struct RunRecord {
    /// Creation sequence number, breaks `created_at` ties when listing.
    seq: u64,
    summary: RunSummary,
    log: LogBuffer,
}

pub struct RunRegistry {
    runs: RwLock<HashMap<RunId, RunRecord>>,
    next_seq: AtomicU64,
    log_cap: usize,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::with_log_cap(DEFAULT_LOG_CAP)
    }

    pub fn with_log_cap(log_cap: usize) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            log_cap,
        }
    }

    /// Create a new run in the `queued` state.
    pub fn create(&self, spec: RunSpec) -> RunSummary {
        let now = chrono::Utc::now();
        let summary = RunSummary {
            id: new_run_id(),
            status: RunStatus::Queued,
            created_at: now,
            updated_at: now,
            spec,
            exit_code: None,
            error: None,
        };
        let record = RunRecord {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            summary: summary.clone(),
            log: LogBuffer::with_cap(self.log_cap),
        };
        self.write().insert(summary.id.clone(), record);
        summary
    }

    /// Move a queued run to `running`.
    pub fn mark_running(&self, id: &str) -> Result<RunSummary, CoreError> {
        let mut runs = self.write();
        let record = find_mut(&mut runs, id)?;
        transition(&mut record.summary, RunStatus::Running)?;
        Ok(record.summary.clone())
    }

    /// Append an output chunk to the run's log, dropping the oldest bytes
    /// once the cap is exceeded.
    pub fn append_log(&self, id: &str, chunk: &str) -> Result<(), CoreError> {
        let mut runs = self.write();
        let record = find_mut(&mut runs, id)?;
        record.log.push(chunk);
        touch(&mut record.summary);
        Ok(())
    }

    /// Record the terminal state of a running run.
    pub fn finish(&self, id: &str, outcome: &RunOutcome) -> Result<RunSummary, CoreError> {
        let mut runs = self.write();
        let record = find_mut(&mut runs, id)?;
        transition(&mut record.summary, outcome.status())?;
        record.summary.exit_code = Some(outcome.exit_code());
        record.summary.error = outcome.error().map(str::to_owned);
        Ok(record.summary.clone())
    }

    /// All runs, newest first, without logs.
    pub fn list(&self) -> Vec<RunSummary> {
        let runs = self.read();
        let mut records: Vec<&RunRecord> = runs.values().collect();
        records.sort_by(|a, b| {
            b.summary
                .created_at
                .cmp(&a.summary.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        records.into_iter().map(|r| r.summary.clone()).collect()
    }

    /// A single run with its current log, or `None` for unknown ids.
    pub fn get(&self, id: &str) -> Option<RunDetail> {
        self.read().get(id).map(|r| RunDetail {
            run: r.summary.clone(),
            log: r.log.contents(),
        })
    }

    pub fn summary(&self, id: &str) -> Option<RunSummary> {
        self.read().get(id).map(|r| r.summary.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<RunId, RunRecord>> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<RunId, RunRecord>> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn find_mut<'a>(
    runs: &'a mut HashMap<RunId, RunRecord>,
    id: &str,
) -> Result<&'a mut RunRecord, CoreError> {
    runs.get_mut(id).ok_or_else(|| CoreError::NotFound {
        entity: "run",
        id: id.to_string(),
    })
}

fn transition(summary: &mut RunSummary, next: RunStatus) -> Result<(), CoreError> {
    if !summary.status.can_transition_to(next) {
        return Err(CoreError::Conflict(format!(
            "run {} cannot move from {} to {}",
            summary.id, summary.status, next
        )));
    }
    summary.status = next;
    touch(summary);
    Ok(())
}

/// Refresh `updated_at` without ever moving it backwards.
fn touch(summary: &mut RunSummary) {
    let now: Timestamp = chrono::Utc::now();
    if now > summary.updated_at {
        summary.updated_at = now;
    }
}
