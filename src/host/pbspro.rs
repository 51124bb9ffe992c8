// src/host/pbspro.rs

use tracing::{debug, info};

use crate::errors::WoomError;
use crate::host::{command_error, run_command, Host, HostFuture, HostJobState, SubmitRequest};

/// PBS Pro batch system.
#[derive(Debug, Clone)]
pub struct PbsProHost {
    name: String,
    max_jobs: Option<usize>,
}

impl PbsProHost {
    pub fn new(name: impl Into<String>, max_jobs: Option<usize>) -> Self {
        Self {
            name: name.into(),
            max_jobs,
        }
    }
}

/// Extract `job_state = X` from `qstat -x -f` output.
pub(crate) fn parse_qstat_state(output: &str) -> Option<HostJobState> {
    let code = output.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "job_state").then(|| value.trim().to_string())
    })?;
    Some(match code.as_str() {
        "Q" | "H" | "W" | "T" | "M" => HostJobState::Queued,
        "F" | "X" => HostJobState::Done,
        // R, E (exiting), B, S, U
        _ => HostJobState::Running,
    })
}

impl Host for PbsProHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_jobs(&self) -> Option<usize> {
        self.max_jobs
    }

    fn submit_command(&self, request: &SubmitRequest) -> Vec<String> {
        let opts = &request.options;
        let mut argv = vec![
            "qsub".to_string(),
            "-N".to_string(),
            request.job_name.clone(),
            "-o".to_string(),
            request.stdout_path.display().to_string(),
            "-e".to_string(),
            request.stderr_path.display().to_string(),
        ];
        if let Some(queue) = &opts.queue {
            argv.extend(["-q".to_string(), queue.clone()]);
        }
        if let Some(time) = &opts.time {
            argv.extend(["-l".to_string(), format!("walltime={time}")]);
        }
        if let Some(mem) = &opts.memory {
            argv.extend(["-l".to_string(), format!("mem={mem}")]);
        }
        if let Some(mail) = &opts.mail {
            argv.extend([
                "-M".to_string(),
                mail.clone(),
                "-m".to_string(),
                "ae".to_string(),
            ]);
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
            let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if id.is_empty() {
                return Err(WoomError::host(&self.name, "qsub printed no job id"));
            }
            info!(host = %self.name, jobid = %id, job = %request.job_name, "submitted to pbspro");
            Ok(id)
        })
    }

    fn poll<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, HostJobState> {
        Box::pin(async move {
            let argv: Vec<String> = ["qstat", "-x", "-f", external_id]
                .iter()
                .map(|s| s.to_string())
                .collect();
            let output = run_command(&self.name, &argv, None).await?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("Unknown Job Id") || stderr.contains("Job has finished") {
                    return Ok(HostJobState::Gone);
                }
                return Err(command_error(&self.name, &argv, &output));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let state = parse_qstat_state(&stdout).unwrap_or(HostJobState::Gone);
            debug!(host = %self.name, jobid = %external_id, ?state, "qstat");
            Ok(state)
        })
    }

    fn kill<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, ()> {
        Box::pin(async move {
            let argv = vec!["qdel".to_string(), external_id.to_string()];
            let output = run_command(&self.name, &argv, None).await?;
            if !output.status.success() {
                return Err(command_error(&self.name, &argv, &output));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qstat_job_state_is_parsed() {
        let out = "Job Id: 42.server\n    Job_Name = model\n    job_state = R\n";
        assert_eq!(parse_qstat_state(out), Some(HostJobState::Running));
        assert_eq!(
            parse_qstat_state("    job_state = Q\n"),
            Some(HostJobState::Queued)
        );
        assert_eq!(
            parse_qstat_state("    job_state = F\n"),
            Some(HostJobState::Done)
        );
        assert_eq!(parse_qstat_state("Job Id: 42\n"), None);
    }
}
