// src/engine/mod.rs

//! Orchestration engine.
//!
//! The pure scheduling rules live in [`core`](self::core); the async shell that renders
//! scripts, talks to hosts and persists records is [`runtime::Workflow`].
//! [`show`] formats what `woom show` prints.

use std::path::PathBuf;

use crate::dag::JobKey;
use crate::store::JobRecord;

pub mod core;
pub mod runtime;
pub mod show;

pub use self::core::{CoreRun, DeferReason, JobAction, PassSummary, PlannedJob};
pub use runtime::{SharedEnvLookup, Workflow};

/// Flags of `woom run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    /// Render and report, but submit nothing and write nothing.
    pub dry_run: bool,
    /// Resubmit jobs that already succeeded.
    pub update: bool,
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub submitted: Vec<JobKey>,
    pub skipped: Vec<JobKey>,
    /// `FAILED`, `SUBMIT_FAILED` or `UNKNOWN` at the end of the run.
    pub failed: Vec<JobKey>,
    /// Still waiting on dependencies when the run ended.
    pub pending: Vec<JobKey>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What `woom clean` removes besides the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanScope {
    pub submission_dirs: bool,
    pub run_dirs: bool,
    pub log_dirs: bool,
    pub artifacts: bool,
    /// Extra globs, relative to the workflow directory.
    pub patterns: Vec<String>,
    /// Report only.
    pub dry_run: bool,
}

impl Default for CleanScope {
    fn default() -> Self {
        Self {
            submission_dirs: true,
            run_dirs: false,
            log_dirs: false,
            artifacts: false,
            patterns: Vec::new(),
            dry_run: false,
        }
    }
}

/// Outcome of a clean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub killed: Vec<JobRecord>,
    pub removed: Vec<PathBuf>,
    pub deleted: usize,
}
