//! Concurrent job status table.
//!
//! Backed by a [`DashMap`], so transitions on different jobs never contend on
//! a global lock. Records are never evicted.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use dr_core::{Error, JobId, JobRecord, JobStatus, JobSummary, Result, Transition};

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    /// Failed jobs.
    pub error: usize,
}

#[derive(Default)]
pub struct StatusTable {
    jobs: DashMap<JobId, JobRecord>,
    seq: AtomicU64,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next admission sequence number.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert a freshly admitted record. Rejects duplicate IDs.
    pub fn create(&self, record: JobRecord) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.jobs.entry(record.id) {
            Entry::Occupied(_) => Err(Error::Internal(format!(
                "job {} already exists",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    /// Apply a transition to one job, returning the updated record.
    pub fn transition(&self, id: JobId, transition: Transition) -> Result<JobRecord> {
        let mut entry = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("job", id))?;
        entry.apply(transition)?;
        Ok(entry.value().clone())
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.get(&id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Every record, oldest admission first.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.jobs.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    pub fn counts(&self) -> StatusCounts {
        self.jobs
            .iter()
            .fold(StatusCounts::default(), |mut counts, r| {
                match r.status {
                    JobStatus::Queued => counts.queued += 1,
                    JobStatus::Processing => counts.processing += 1,
                    JobStatus::Completed => counts.completed += 1,
                    JobStatus::Failed => counts.error += 1,
                }
                counts
            })
    }

    /// The `n` most recently admitted jobs, newest first.
    pub fn recent(&self, n: usize) -> Vec<JobSummary> {
        let mut recent: Vec<(u64, JobSummary)> = self
            .jobs
            .iter()
            .map(|r| (r.seq, JobSummary::from(r.value())))
            .collect();
        recent.sort_by(|a, b| b.0.cmp(&a.0));
        recent.into_iter().take(n).map(|(_, s)| s).collect()
    }
}
