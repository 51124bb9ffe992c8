// src/store/mod.rs

//! Persisted job state, keyed by job identity.
//!
//! - [`FileJobStore`]: JSON file under `<workflow_dir>/.woom`, guarded by an
//!   exclusive file lock for every read-modify-write so that concurrent
//!   `woom` invocations never corrupt each other's records.
//! - [`MemoryJobStore`]: in-process store for tests and dry runs.

use crate::dag::JobKey;
use crate::errors::Result;

pub mod file;
pub mod memory;
pub mod record;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;
pub use record::{JobFilter, JobRecord, JobStatus};

/// Trait for job state storage.
///
/// Identity `(task, cycle, member)` is unique: upserting an existing key
/// replaces the previous record.
pub trait JobStore: Send + Sync {
    /// Insert or replace the record with the same key.
    fn upsert(&self, record: JobRecord) -> Result<()>;

    /// Insert or replace several records in one locked transaction.
    fn upsert_many(&self, records: Vec<JobRecord>) -> Result<()> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(())
    }

    /// Records matching `filter`, sorted by key.
    fn get(&self, filter: &JobFilter) -> Result<Vec<JobRecord>>;

    /// Remove records matching `filter`; returns how many were removed.
    fn delete(&self, filter: &JobFilter) -> Result<usize>;

    /// The record with exactly this key, if any.
    fn find(&self, key: &JobKey) -> Result<Option<JobRecord>> {
        Ok(self
            .get(&JobFilter::key(key))?
            .into_iter()
            .find(|r| &r.key == key))
    }
}

/// Replace-or-insert into a sorted vector; shared by both stores.
pub(crate) fn merge_record(records: &mut Vec<JobRecord>, record: JobRecord) {
    match records.binary_search_by(|r| r.key.cmp(&record.key)) {
        Ok(pos) => records[pos] = record,
        Err(pos) => records.insert(pos, record),
    }
}
