use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use woom::errors::{Result, WoomError};
use woom::host::{Host, HostFuture, HostJobState, SubmitRequest};
use woom::paths::STATUS_FILE;

/// What a fake job does once submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOutcome {
    /// Finishes at once with exit status 0.
    Succeed,
    /// Finishes at once with the given exit status.
    Fail(i32),
    /// Stays running until killed.
    Run,
    /// The host refuses the submission.
    Reject,
}

/// One call received by a [`FakeHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Submit { job_name: String, script: PathBuf },
    Poll(String),
    Kill(String),
}

type KillHook = Box<dyn Fn(&str) + Send + Sync>;

/// A host that records every call and plays scripted outcomes.
///
/// Outcomes are chosen per task (the part of the job name before the first
/// `.`). Finishing jobs get their `job.status` written at submission, the
/// way the trap of a real script would.
pub struct FakeHost {
    name: String,
    max_jobs: Option<usize>,
    outcomes: BTreeMap<String, FakeOutcome>,
    default_outcome: FakeOutcome,
    unreachable: bool,
    calls: Mutex<Vec<HostCall>>,
    jobs: Mutex<HashMap<String, (PathBuf, FakeOutcome)>>,
    on_kill: Option<KillHook>,
}

impl FakeHost {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            max_jobs: None,
            outcomes: BTreeMap::new(),
            default_outcome: FakeOutcome::Succeed,
            unreachable: false,
            calls: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            on_kill: None,
        }
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = Some(max_jobs);
        self
    }

    pub fn with_outcome(mut self, task: &str, outcome: FakeOutcome) -> Self {
        self.outcomes.insert(task.to_string(), outcome);
        self
    }

    pub fn with_default_outcome(mut self, outcome: FakeOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Every poll fails.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Called with the job id before each kill is recorded.
    pub fn on_kill(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_kill = Some(Box::new(hook));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Submit { job_name, .. } => Some(job_name),
                _ => None,
            })
            .collect()
    }

    pub fn killed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Kill(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn outcome_for(&self, job_name: &str) -> FakeOutcome {
        let task = job_name.split('.').next().unwrap_or(job_name);
        self.outcomes
            .get(task)
            .copied()
            .unwrap_or(self.default_outcome)
    }

    fn do_submit(&self, request: &SubmitRequest) -> Result<String> {
        self.record(HostCall::Submit {
            job_name: request.job_name.clone(),
            script: request.script_path.clone(),
        });
        let outcome = self.outcome_for(&request.job_name);
        let code = match outcome {
            FakeOutcome::Reject => {
                return Err(WoomError::host(&self.name, "submission rejected"));
            }
            FakeOutcome::Succeed => Some(0),
            FakeOutcome::Fail(code) => Some(code),
            FakeOutcome::Run => None,
        };
        if let Some(code) = code {
            std::fs::write(request.submission_dir.join(STATUS_FILE), format!("{code}\n"))?;
        }

        let mut jobs = self.jobs.lock().unwrap();
        let id = format!("{}-{}", self.name, jobs.len() + 1);
        jobs.insert(id.clone(), (request.submission_dir.clone(), outcome));
        Ok(id)
    }

    fn do_poll(&self, id: &str) -> Result<HostJobState> {
        self.record(HostCall::Poll(id.to_string()));
        if self.unreachable {
            return Err(WoomError::host(&self.name, "host unreachable"));
        }
        let jobs = self.jobs.lock().unwrap();
        Ok(match jobs.get(id) {
            Some((_, FakeOutcome::Run)) => HostJobState::Running,
            Some(_) => HostJobState::Done,
            None => HostJobState::Gone,
        })
    }

    fn do_kill(&self, id: &str) -> Result<()> {
        if let Some(hook) = &self.on_kill {
            hook(id);
        }
        self.record(HostCall::Kill(id.to_string()));
        self.jobs.lock().unwrap().remove(id);
        Ok(())
    }
}

impl Host for FakeHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_jobs(&self) -> Option<usize> {
        self.max_jobs
    }

    fn submit_command(&self, request: &SubmitRequest) -> Vec<String> {
        vec!["fake-submit".to_string(), request.script_path.display().to_string()]
    }

    fn submit<'a>(&'a self, request: &'a SubmitRequest) -> HostFuture<'a, String> {
        Box::pin(async move { self.do_submit(request) })
    }

    fn poll<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, HostJobState> {
        Box::pin(async move { self.do_poll(external_id) })
    }

    fn kill<'a>(&'a self, external_id: &'a str) -> HostFuture<'a, ()> {
        Box::pin(async move { self.do_kill(external_id) })
    }
}
