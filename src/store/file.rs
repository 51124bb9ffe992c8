// src/store/file.rs

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::{Result, WoomError};
use crate::store::{merge_record, JobFilter, JobRecord, JobStore};

/// State directory, relative to the workflow directory.
pub const STATE_DIR: &str = ".woom";
const JOBS_FILE: &str = "jobs.json";
const LOCK_FILE: &str = "jobs.lock";

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Job store persisted as a JSON array in `<workflow_dir>/.woom/jobs.json`.
///
/// Every operation holds an exclusive lock on `jobs.lock` while it reads
/// and (for writes) replaces the file through a temporary file + rename.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

/// Exclusive lock on the store, released on drop.
struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(error = %e, "failed to release job store lock");
        }
    }
}

impl FileJobStore {
    pub fn new(workflow_dir: impl AsRef<Path>, lock_timeout: Duration) -> Self {
        Self {
            dir: workflow_dir.as_ref().join(STATE_DIR),
            lock_timeout,
        }
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.dir.join(JOBS_FILE)
    }

    fn lock(&self) -> Result<StoreLock> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let started = Instant::now();
        loop {
            match file.try_lock() {
                Ok(()) => return Ok(StoreLock { file }),
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(WoomError::LockTimeout(path));
                    }
                    debug!(path = %path.display(), "job store locked by another process; waiting");
                    std::thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }
    }

    fn read(&self) -> Result<Vec<JobRecord>> {
        let path = self.jobs_path();
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut records: Vec<JobRecord> = serde_json::from_str(&contents).map_err(|e| {
            WoomError::Store(format!("corrupt job store {}: {e}", path.display()))
        })?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    fn write(&self, records: &[JobRecord]) -> Result<()> {
        let path = self.jobs_path();
        let tmp = self.dir.join(format!("{JOBS_FILE}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, records)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Vec<JobRecord>) -> T) -> Result<T> {
        let _lock = self.lock()?;
        let mut records = self.read()?;
        let out = f(&mut records);
        self.write(&records)?;
        Ok(out)
    }
}

impl JobStore for FileJobStore {
    fn upsert(&self, record: JobRecord) -> Result<()> {
        self.modify(|records| merge_record(records, record))
    }

    fn upsert_many(&self, new: Vec<JobRecord>) -> Result<()> {
        self.modify(|records| {
            for record in new {
                merge_record(records, record);
            }
        })
    }

    fn get(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let _lock = self.lock()?;
        Ok(self
            .read()?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect())
    }

    fn delete(&self, filter: &JobFilter) -> Result<usize> {
        self.modify(|records| {
            let before = records.len();
            records.retain(|r| !filter.matches(r));
            before - records.len()
        })
    }
}
