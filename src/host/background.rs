// src/host/background.rs

//! Local host running each job as a detached `bash job.sh` process.

use std::collections::HashMap;
use std::fs::File;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::errors::{Result, WoomError};
use crate::host::{run_command, Host, HostFuture, HostJobState, SubmitRequest};

/// Background scheduler: the external job id is the process id.
///
/// Processes spawned by this instance are tracked through their handles;
/// ids from an earlier invocation are probed with `kill -0`.
#[derive(Debug)]
pub struct BackgroundHost {
    name: String,
    max_jobs: Option<usize>,
    children: Mutex<HashMap<String, Child>>,
}

impl BackgroundHost {
    pub fn new(name: impl Into<String>, max_jobs: Option<usize>) -> Self {
        Self {
            name: name.into(),
            max_jobs,
            children: Mutex::new(HashMap::new()),
        }
    }

    fn children(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Child>>> {
        self.children
            .lock()
            .map_err(|_| WoomError::host(&self.name, "process table mutex poisoned"))
    }

    fn spawn(&self, request: &SubmitRequest) -> Result<String> {
        let stdout = File::create(&request.stdout_path)?;
        let stderr = File::create(&request.stderr_path)?;

        let mut cmd = Command::new("bash");
        cmd.arg(&request.script_path)
            .current_dir(&request.submission_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        // Own process group: a Ctrl-C on woom must not reach the job.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| WoomError::host(&self.name, format!("spawning bash: {e}")))?;
        let pid = child
            .id()
            .ok_or_else(|| WoomError::host(&self.name, "spawned job has no pid"))?
            .to_string();

        info!(host = %self.name, jobid = %pid, job = %request.job_name, "started background job");
        self.children()?.insert(pid.clone(), child);
        Ok(pid)
    }

    fn poll_tracked(&self, id: &str) -> Result<Option<HostJobState>> {
        let mut children = self.children()?;
        let Some(child) = children.get_mut(id) else {
            return Ok(None);
        };
        match child.try_wait()? {
            Some(status) => {
                debug!(host = %self.name, jobid = %id, %status, "background job exited");
                children.remove(id);
                Ok(Some(HostJobState::Done))
            }
            None => Ok(Some(HostJobState::Running)),
        }
    }
}

impl Host for BackgroundHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_jobs(&self) -> Option<usize> {
        self.max_jobs
    }

    fn submit_command(&self, request: &SubmitRequest) -> Vec<String> {
        vec!["bash".to_string(), request.script_path.display().to_string()]
    }

    fn submit<'a>(&'a self, request: &'a SubmitRequest) -> HostFuture<'a, String> {
        Box::pin(async move { self.spawn(request) })
    }

    fn poll<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, HostJobState> {
        Box::pin(async move {
            if let Some(state) = self.poll_tracked(external_id)? {
                return Ok(state);
            }
            let argv = ["kill".to_string(), "-0".to_string(), external_id.to_string()];
            let output = run_command(&self.name, &argv, None).await?;
            Ok(if output.status.success() {
                HostJobState::Running
            } else {
                HostJobState::Gone
            })
        })
    }

    fn kill<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, ()> {
        Box::pin(async move {
            {
                let mut children = self.children()?;
                if let Some(child) = children.get_mut(external_id) {
                    child.start_kill()?;
                    return Ok(());
                }
            }
            let argv = [
                "kill".to_string(),
                "-TERM".to_string(),
                external_id.to_string(),
            ];
            let output = run_command(&self.name, &argv, None).await?;
            if !output.status.success() {
                debug!(host = %self.name, jobid = %external_id, "process already gone");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::SubmitOptions;

    fn request(dir: &std::path::Path, body: &str) -> SubmitRequest {
        let script = dir.join("job.sh");
        std::fs::write(&script, body).unwrap();
        SubmitRequest {
            job_name: "test".into(),
            script_path: script,
            submission_dir: dir.to_path_buf(),
            stdout_path: dir.join("job.out"),
            stderr_path: dir.join("job.err"),
            options: SubmitOptions::default(),
        }
    }

    #[tokio::test]
    async fn runs_script_and_reports_done() {
        let tmp = tempfile::tempdir().unwrap();
        let host = BackgroundHost::new("local", None);
        let req = request(tmp.path(), "echo hello\n");

        let id = host.submit(&req).await.unwrap();
        let mut state = host.poll(&id).await.unwrap();
        for _ in 0..100 {
            if state == HostJobState::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            state = host.poll(&id).await.unwrap();
        }
        assert_eq!(state, HostJobState::Done);
        let out = std::fs::read_to_string(tmp.path().join("job.out")).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn kill_stops_running_job() {
        let tmp = tempfile::tempdir().unwrap();
        let host = BackgroundHost::new("local", None);
        let id = host.submit(&request(tmp.path(), "sleep 30\n")).await.unwrap();
        assert_eq!(host.poll(&id).await.unwrap(), HostJobState::Running);

        host.kill(&id).await.unwrap();
        let mut state = host.poll(&id).await.unwrap();
        for _ in 0..100 {
            if state == HostJobState::Done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            state = host.poll(&id).await.unwrap();
        }
        assert_eq!(state, HostJobState::Done);
    }
}
