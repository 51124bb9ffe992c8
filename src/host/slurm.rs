// src/host/slurm.rs

use tracing::{debug, info};

use crate::errors::WoomError;
use crate::host::{command_error, run_command, Host, HostFuture, HostJobState, SubmitRequest};

/// Slurm batch system.
#[derive(Debug, Clone)]
pub struct SlurmHost {
    name: String,
    max_jobs: Option<usize>,
}

impl SlurmHost {
    pub fn new(name: impl Into<String>, max_jobs: Option<usize>) -> Self {
        Self {
            name: name.into(),
            max_jobs,
        }
    }
}

/// `sbatch --parsable` prints `<jobid>[;<cluster>]`.
pub(crate) fn parse_sbatch_output(stdout: &str) -> Option<String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let id = line.split(';').next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Map a compact `squeue` state code (`%t`) to a host state.
pub(crate) fn parse_squeue_state(code: &str) -> HostJobState {
    match code.trim() {
        "" => HostJobState::Gone,
        "PD" | "CF" | "RQ" | "RF" | "RH" | "RS" | "SE" => HostJobState::Queued,
        "CD" | "F" | "CA" | "TO" | "NF" | "OOM" | "PR" | "BF" | "DL" | "RV" => {
            HostJobState::Done
        }
        // R, CG, S, ST, SI, SO...
        _ => HostJobState::Running,
    }
}

impl Host for SlurmHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_jobs(&self) -> Option<usize> {
        self.max_jobs
    }

    fn submit_command(&self, request: &SubmitRequest) -> Vec<String> {
        let opts = &request.options;
        let mut argv = vec![
            "sbatch".to_string(),
            "--parsable".to_string(),
            format!("--job-name={}", request.job_name),
            format!("--output={}", request.stdout_path.display()),
            format!("--error={}", request.stderr_path.display()),
        ];
        if let Some(queue) = &opts.queue {
            argv.push(format!("--partition={queue}"));
        }
        if let Some(time) = &opts.time {
            argv.push(format!("--time={time}"));
        }
        if let Some(mem) = &opts.memory {
            argv.push(format!("--mem={mem}"));
        }
        if let Some(mail) = &opts.mail {
            argv.push(format!("--mail-user={mail}"));
            argv.push("--mail-type=END,FAIL".to_string());
        }
        argv.extend(opts.extra.iter().cloned());
        argv.push(request.script_path.display().to_string());
        argv
    }

    fn submit<'a>(&'a self, request: &'a SubmitRequest) -> HostFuture<'a, String> {
        Box::pin(async move {
            let argv = self.submit_command(request);
            let output = run_command(&self.name, &argv, Some(&request.submission_dir)).await?;
            if !output.status.success() {
                return Err(command_error(&self.name, &argv, &output));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let id = parse_sbatch_output(&stdout).ok_or_else(|| {
                WoomError::host(&self.name, format!("unexpected sbatch output: {stdout:?}"))
            })?;
            info!(host = %self.name, jobid = %id, job = %request.job_name, "submitted to slurm");
            Ok(id)
        })
    }

    fn poll<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, HostJobState> {
        Box::pin(async move {
            let argv: Vec<String> = ["squeue", "-h", "-j", external_id, "-o", "%t"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            let output = run_command(&self.name, &argv, None).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("Invalid job id") {
                    return Ok(HostJobState::Gone);
                }
                return Err(command_error(&self.name, &argv, &output));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let state = parse_squeue_state(stdout.lines().next().unwrap_or(""));
            debug!(host = %self.name, jobid = %external_id, ?state, "squeue");
            Ok(state)
        })
    }

    fn kill<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, ()> {
        Box::pin(async move {
            let argv = vec!["scancel".to_string(), external_id.to_string()];
            let output = run_command(&self.name, &argv, None).await?;
            if !output.status.success() {
                return Err(command_error(&self.name, &argv, &output));
            }
            Ok(())
        })
    }
}
