// src/store/record.rs

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::JobKey;

/// Lifecycle state of a job.
///
/// ```text
/// PENDING -> SUBMITTED -> RUNNING -> SUCCEEDED | FAILED
///         \-> SUBMIT_FAILED
/// SUBMITTED | RUNNING -> KILLED      (explicit kill)
/// SUBMITTED | RUNNING -> UNKNOWN     (poll retries exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
    SubmitFailed,
    Unknown,
    Killed,
}

impl JobStatus {
    /// The job is (or may be) live on its host.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Submitted | JobStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active() && self != JobStatus::Pending
    }

    pub fn is_success(self) -> bool {
        self == JobStatus::Succeeded
    }

    /// Terminal states that make a run exit non-zero.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::SubmitFailed | JobStatus::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::SubmitFailed => "SUBMIT_FAILED",
            JobStatus::Unknown => "UNKNOWN",
            JobStatus::Killed => "KILLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            JobStatus::Pending,
            JobStatus::Submitted,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::SubmitFailed,
            JobStatus::Unknown,
            JobStatus::Killed,
        ];
        let wanted = s.trim().to_uppercase();
        all.into_iter()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| format!("invalid job status: {s}"))
    }
}

/// Persisted state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(flatten)]
    pub key: JobKey,
    #[serde(default)]
    pub cycle_label: Option<String>,
    pub external_id: Option<String>,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub host: String,
    pub submission_dir: PathBuf,
    pub run_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub poll_failures: u32,
}

impl JobRecord {
    /// Move to `status`, stamping `updated_at`.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Selection over stored records. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub task: Option<String>,
    /// Cycle token or cycle label.
    pub cycle: Option<String>,
    pub member: Option<u32>,
    pub external_ids: Vec<String>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter selecting exactly one job.
    pub fn key(key: &JobKey) -> Self {
        Self {
            task: Some(key.task.clone()),
            cycle: key.cycle.clone(),
            member: key.member,
            external_ids: Vec::new(),
        }
    }

    pub fn task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn cycle(mut self, cycle: impl Into<String>) -> Self {
        self.cycle = Some(cycle.into());
        self
    }

    pub fn member(mut self, member: u32) -> Self {
        self.member = Some(member);
        self
    }

    pub fn external_id(mut self, id: impl Into<String>) -> Self {
        self.external_ids.push(id.into());
        self
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        if let Some(task) = &self.task {
            if &record.key.task != task {
                return false;
            }
        }
        if let Some(cycle) = &self.cycle {
            let by_token = record.key.cycle.as_ref() == Some(cycle);
            let by_label = record.cycle_label.as_ref() == Some(cycle);
            if !(by_token || by_label) {
                return false;
            }
        }
        if let Some(member) = self.member {
            if record.key.member != Some(member) {
                return false;
            }
        }
        if !self.external_ids.is_empty() {
            match &record.external_id {
                Some(id) if self.external_ids.contains(id) => {}
                _ => return false,
            }
        }
        true
    }
}
