// src/store/memory.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::errors::{Result, WoomError};
use crate::store::{merge_record, JobFilter, JobRecord, JobStore};

/// In-memory job store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<Vec<JobRecord>>,
    writes: AtomicUsize,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of upsert/delete calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Vec<JobRecord>) -> T) -> Result<T> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| WoomError::Store("memory store mutex poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

impl JobStore for MemoryJobStore {
    fn upsert(&self, record: JobRecord) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.with_records(|records| merge_record(records, record))
    }

    fn get(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        self.with_records(|records| {
            records
                .iter()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect()
        })
    }

    fn delete(&self, filter: &JobFilter) -> Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.with_records(|records| {
            let before = records.len();
            records.retain(|r| !filter.matches(r));
            before - records.len()
        })
    }
}
