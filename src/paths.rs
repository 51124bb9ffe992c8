// src/paths.rs

//! Deterministic job directory layout.
//!
//! Expansion, the state store and the rendered script context all take their
//! paths from [`JobPaths::new`], so the three always agree.

use std::path::{Path, PathBuf};

/// Application identity, `name/conf/exp` with absent parts skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppId {
    pub name: Option<String>,
    pub conf: Option<String>,
    pub exp: Option<String>,
}

impl AppId {
    pub fn path(&self) -> String {
        join_parts([
            self.name.as_deref(),
            self.conf.as_deref(),
            self.exp.as_deref(),
        ])
    }
}

/// Directories owned by one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    /// `{app_path}/{cycle_token}/{task}/{member_label}`, empty parts skipped.
    pub task_path: String,
    /// `{workflow_dir}/jobs/{task_path}`; holds `job.sh`, `job.status`, ...
    pub submission_dir: PathBuf,
    /// `{workflow_dir}/log/{task_path}`
    pub log_dir: PathBuf,
}

impl JobPaths {
    pub fn new(
        workflow_dir: &Path,
        app: &AppId,
        cycle_token: Option<&str>,
        task: &str,
        member_label: Option<&str>,
    ) -> Self {
        let app_path = app.path();
        let task_path = join_parts([
            Some(app_path.as_str()),
            cycle_token,
            Some(task),
            member_label,
        ]);
        Self {
            submission_dir: workflow_dir.join("jobs").join(&task_path),
            log_dir: workflow_dir.join("log").join(&task_path),
            task_path,
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.submission_dir.join(SCRIPT_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.submission_dir.join(STATUS_FILE)
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.submission_dir.join(STDOUT_FILE)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.submission_dir.join(STDERR_FILE)
    }
}

pub const SCRIPT_FILE: &str = "job.sh";
pub const STATUS_FILE: &str = "job.status";
pub const STDOUT_FILE: &str = "job.out";
pub const STDERR_FILE: &str = "job.err";

fn join_parts<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
