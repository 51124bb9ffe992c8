// src/host/mod.rs

//! Compute hosts: where job scripts are submitted, polled and killed.
//!
//! The orchestrator only talks to the [`Host`] trait; each batch system has
//! its own implementation:
//! - [`BackgroundHost`]: detached local `bash` processes.
//! - [`SlurmHost`]: `sbatch` / `squeue` / `scancel`.
//! - [`PbsProHost`]: `qsub` / `qstat` / `qdel`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Output;

use tokio::process::Command;

use crate::config::SubmitOptions;
use crate::errors::{Result, WoomError};

pub mod background;
pub mod pbspro;
pub mod registry;
pub mod retry;
pub mod slurm;

pub use background::BackgroundHost;
pub use pbspro::PbsProHost;
pub use registry::{current_hostname, infer_host_name, HostRegistry};
pub use retry::RetryPolicy;
pub use slurm::SlurmHost;

/// Boxed future returned by [`Host`] methods, keeping the trait dyn-compatible.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What a host reports about a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostJobState {
    /// Accepted, waiting for resources.
    Queued,
    Running,
    /// Finished; the job's status file tells how.
    Done,
    /// The host no longer knows the job.
    Gone,
}

/// Everything a host needs to submit one job script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    /// Scheduler-visible job name.
    pub job_name: String,
    pub script_path: PathBuf,
    pub submission_dir: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// Submission options, queue already mapped to the host's real name.
    pub options: SubmitOptions,
}

/// Trait abstracting a batch system.
///
/// Production code uses the scheduler implementations of this module; tests
/// provide a recording fake.
pub trait Host: Send + Sync {
    fn name(&self) -> &str;

    /// Maximum number of simultaneously submitted jobs, if limited.
    fn max_jobs(&self) -> Option<usize>;

    /// The command line that would submit `request` (reported in dry runs).
    fn submit_command(&self, request: &SubmitRequest) -> Vec<String>;

    /// Submit a job script and return the external job id.
    fn submit<'a>(&'a self, request: &'a SubmitRequest) -> HostFuture<'a, String>;

    fn poll<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, HostJobState>;

    fn kill<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, ()>;
}

/// Run `argv` to completion and capture its output.
///
/// Failing to spawn the program is a host communication error; a non-zero
/// exit status is left for the caller to interpret.
pub(crate) async fn run_command(
    host: &str,
    argv: &[String],
    cwd: Option<&std::path::Path>,
) -> Result<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| WoomError::host(host, "empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.output()
        .await
        .map_err(|e| WoomError::host(host, format!("running `{program}`: {e}")))
}

/// Turn a failed command into a host error carrying its stderr.
pub(crate) fn command_error(host: &str, argv: &[String], output: &Output) -> WoomError {
    WoomError::host(
        host,
        format!(
            "`{}` exited with {}: {}",
            argv.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    )
}
