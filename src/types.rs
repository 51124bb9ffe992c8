use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Batch system used by a host to run jobs.
///
/// - `Background`: run `bash job.sh` as a detached local process.
/// - `Slurm`: `sbatch` / `squeue` / `scancel`.
/// - `PbsPro`: `qsub` / `qstat` / `qdel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Background,
    Slurm,
    PbsPro,
}

impl Default for SchedulerKind {
    fn default() -> Self {
        SchedulerKind::Background
    }
}

impl FromStr for SchedulerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "background" => Ok(SchedulerKind::Background),
            "slurm" => Ok(SchedulerKind::Slurm),
            "pbspro" => Ok(SchedulerKind::PbsPro),
            other => Err(format!(
                "invalid scheduler: {other} (expected \"background\", \"slurm\" or \"pbspro\")"
            )),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Background => write!(f, "background"),
            SchedulerKind::Slurm => write!(f, "slurm"),
            SchedulerKind::PbsPro => write!(f, "pbspro"),
        }
    }
}

/// How a Python virtual environment is activated in job scripts.
///
/// `"auto"` activates the environment of the submitting process
/// (`$VIRTUAL_ENV`) if there is one, `"off"` never activates, and any other
/// string is taken as the path of the environment to activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenvMode {
    Auto,
    Off,
    Path(String),
}

impl Default for VenvMode {
    fn default() -> Self {
        VenvMode::Auto
    }
}

impl<'de> Deserialize<'de> for VenvMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.trim() {
            "auto" => VenvMode::Auto,
            "off" | "false" | "none" => VenvMode::Off,
            path => VenvMode::Path(path.to_string()),
        })
    }
}
