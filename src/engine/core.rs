// src/engine/core.rs

//! Pure scheduling core of a run.
//!
//! [`CoreRun`] holds the planned jobs and the latest known record of each.
//! The IO shell ([`crate::engine::Workflow`]) asks it what to do with each
//! job ([`CoreRun::step`]), performs the host calls, and feeds resulting
//! records back with [`CoreRun::apply`].
//!
//! Nothing in here touches the filesystem, a host, or the clock, so every
//! rule is unit tested directly.

use std::collections::{BTreeMap, BTreeSet};

use crate::dag::{JobInstance, JobKey};
use crate::store::{JobRecord, JobStatus};

/// One job of the run, with its resolved host and job dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJob {
    pub instance: JobInstance,
    pub host: String,
    pub deps: Vec<JobKey>,
}

impl PlannedJob {
    pub fn key(&self) -> &JobKey {
        &self.instance.key
    }
}

/// Why a job is not submitted in this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// Some dependency has not succeeded (yet).
    Dependencies,
    /// The host runs as many jobs as it accepts.
    HostLimit,
    /// A failure occurred and the run stops on errors.
    Halted,
}

/// What the shell should do with one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    /// Already satisfied; nothing to do.
    Skip,
    /// Live on its host; poll it.
    Track,
    /// Render and submit.
    Submit,
    Defer(DeferReason),
    /// Settled in this run.
    Done,
}

/// Counters of one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub submitted: usize,
    pub tracked: usize,
    pub deferred: usize,
}

/// Scheduling state of one run.
#[derive(Debug, Clone)]
pub struct CoreRun {
    jobs: Vec<PlannedJob>,
    records: BTreeMap<JobKey, JobRecord>,
    /// Jobs that need no further action in this run.
    settled: BTreeSet<JobKey>,
    /// Jobs submitted by this run; `update` no longer applies to them.
    submitted: BTreeSet<JobKey>,
    update: bool,
    stop_on_error: bool,
    halted: bool,
}

impl CoreRun {
    /// `records` may contain records of jobs outside `jobs`; they are ignored.
    pub fn new(
        jobs: Vec<PlannedJob>,
        records: impl IntoIterator<Item = JobRecord>,
        update: bool,
        stop_on_error: bool,
    ) -> Self {
        let keys: BTreeSet<&JobKey> = jobs.iter().map(|j| j.key()).collect();
        let records = records
            .into_iter()
            .filter(|r| keys.contains(&r.key))
            .map(|r| (r.key.clone(), r))
            .collect();
        Self {
            jobs,
            records,
            settled: BTreeSet::new(),
            submitted: BTreeSet::new(),
            update,
            stop_on_error,
            halted: false,
        }
    }

    pub fn jobs(&self) -> &[PlannedJob] {
        &self.jobs
    }

    pub fn record(&self, key: &JobKey) -> Option<&JobRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.values()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Every job is settled.
    pub fn is_complete(&self) -> bool {
        self.jobs.iter().all(|j| self.settled.contains(j.key()))
    }

    /// Nothing can change any more: the last pass neither submitted nor
    /// tracked anything, so the remaining jobs wait on dependencies that
    /// will never succeed.
    pub fn is_stalled(&self, pass: &PassSummary) -> bool {
        pass.submitted == 0 && pass.tracked == 0
    }

    /// Jobs currently live on `host`.
    pub fn active_on(&self, host: &str) -> usize {
        self.records
            .values()
            .filter(|r| r.host == host && r.status.is_active())
            .count()
    }

    /// A dependency is met once its job succeeded and is settled, so that a
    /// success about to be overridden by `update` does not count.
    pub fn deps_satisfied(&self, job: &PlannedJob) -> bool {
        job.deps.iter().all(|dep| {
            self.settled.contains(dep)
                && self.records.get(dep).is_some_and(|r| r.status.is_success())
        })
    }

    /// Decide what to do with the job at `index`.
    ///
    /// `max_jobs` is the host's limit of live jobs, if any.
    pub fn step(&mut self, index: usize, max_jobs: Option<usize>) -> JobAction {
        let Some(job) = self.jobs.get(index) else {
            return JobAction::Done;
        };
        let key = job.key().clone();
        if self.settled.contains(&key) {
            return JobAction::Done;
        }

        if let Some(record) = self.records.get(&key) {
            if record.status.is_active() {
                return JobAction::Track;
            }
            let update = self.update && !self.submitted.contains(&key);
            if record.status.is_success() && !update {
                self.settled.insert(key);
                return JobAction::Skip;
            }
        }

        if self.halted {
            return JobAction::Defer(DeferReason::Halted);
        }
        if !self.deps_satisfied(job) {
            return JobAction::Defer(DeferReason::Dependencies);
        }
        if max_jobs.is_some_and(|max| self.active_on(&job.host) >= max) {
            return JobAction::Defer(DeferReason::HostLimit);
        }
        JobAction::Submit
    }

    /// Record the outcome of a submit or poll.
    pub fn apply(&mut self, record: JobRecord) {
        let key = record.key.clone();
        let status = record.status;
        if status == JobStatus::Submitted {
            self.submitted.insert(key.clone());
        }
        if status.is_terminal() {
            self.settled.insert(key.clone());
            if status.is_failure() && self.stop_on_error {
                self.halted = true;
            }
        }
        self.records.insert(key, record);
    }

    /// Jobs left unsettled and not live: they stay `PENDING`.
    pub fn blocked(&self) -> impl Iterator<Item = &PlannedJob> {
        self.jobs.iter().filter(|j| {
            !self.settled.contains(j.key())
                && !self
                    .records
                    .get(j.key())
                    .is_some_and(|r| r.status.is_active())
        })
    }
}
