// src/engine/runtime.rs

//! The [`Workflow`]: async IO shell around [`CoreRun`].
//!
//! It renders and writes job scripts, talks to hosts through a
//! [`RetryPolicy`], and persists every record change to the [`JobStore`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{Config, TaskConfig};
use crate::dag::{expand, job_dependencies, JobInstance, TaskGraph};
use crate::errors::{Result, WoomError};
use crate::host::{Host, HostJobState, HostRegistry, RetryPolicy, SubmitRequest};
use crate::paths::JobPaths;
use crate::render::{process_env, write_script, JobLocations, ScriptBuilder, TemplateRenderer};
use crate::store::{JobFilter, JobRecord, JobStatus, JobStore};

use super::core::{CoreRun, JobAction, PassSummary, PlannedJob};
use super::{CleanReport, CleanScope, RunMode, RunReport};

/// Process environment lookup used when rendering `vars.forward` and venvs.
pub type SharedEnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A loaded workflow bound to its hosts and state store.
pub struct Workflow {
    config: Config,
    graph: TaskGraph,
    hosts: HostRegistry,
    host_name: String,
    store: Arc<dyn JobStore>,
    renderer: TemplateRenderer,
    retry: RetryPolicy,
    poll_interval: Duration,
    env_lookup: SharedEnvLookup,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("workflow_dir", &self.config.workflow_dir)
            .field("host", &self.host_name)
            .field("hosts", &self.hosts)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Bind `config` to `hosts` and `store`; the default host is inferred
    /// from the hostname.
    pub fn new(config: Config, hosts: HostRegistry, store: Arc<dyn JobStore>) -> Result<Self> {
        let graph = TaskGraph::from_config(&config.tasks)?;
        let host_name = hosts.infer();
        let retry = RetryPolicy::from_run_options(&config.workflow.run);
        let poll_interval = config.workflow.run.poll_interval;
        let workflow = Self {
            config,
            graph,
            hosts,
            host_name,
            store,
            renderer: TemplateRenderer::default(),
            retry,
            poll_interval,
            env_lookup: Arc::new(process_env),
        };
        workflow.check_hosts()?;
        Ok(workflow)
    }

    /// Use `name` as the default host instead of the inferred one.
    pub fn with_host_name(mut self, name: impl Into<String>) -> Result<Self> {
        self.host_name = name.into();
        self.check_hosts()?;
        Ok(self)
    }

    pub fn with_renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_env_lookup(mut self, lookup: SharedEnvLookup) -> Self {
        self.env_lookup = lookup;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    /// Every host a task may run on must exist before anything happens.
    fn check_hosts(&self) -> Result<()> {
        self.hosts.get(&self.host_name)?;
        for (name, task) in self.config.tasks.iter() {
            if let Some(host) = task.host.as_deref() {
                self.hosts.get(host).map_err(|_| {
                    WoomError::config(format!("task '{name}' uses unknown host '{host}'"))
                })?;
            }
        }
        Ok(())
    }

    fn task_host<'t>(&'t self, task: &'t TaskConfig) -> &'t str {
        task.host.as_deref().unwrap_or(&self.host_name)
    }

    fn task(&self, name: &str) -> Result<&TaskConfig> {
        self.config
            .tasks
            .get(name)
            .ok_or_else(|| WoomError::config(format!("unknown task '{name}'")))
    }

    /// All jobs of the workflow: tasks in dependency order, each expanded
    /// in increasing cycle then member order.
    pub fn jobs(&self) -> Vec<PlannedJob> {
        let mut jobs = Vec::new();
        for name in self.graph.order() {
            let Some(task) = self.config.tasks.get(name) else {
                continue;
            };
            for instance in expand(task, &self.config.workflow) {
                let deps = job_dependencies(&instance, &self.config.tasks, &self.config.workflow);
                jobs.push(PlannedJob {
                    instance,
                    host: self.task_host(task).to_string(),
                    deps,
                });
            }
        }
        jobs
    }

    pub fn job_paths(&self, instance: &JobInstance) -> JobPaths {
        let member_label = instance
            .member_index
            .and_then(|i| self.config.workflow.members.as_ref()?.get(i))
            .map(|m| m.label());
        JobPaths::new(
            &self.config.workflow_dir,
            &self.config.workflow.app,
            instance.key.cycle.as_deref(),
            &instance.key.task,
            member_label.as_deref(),
        )
    }

    /// Run and artifact directories of a job.
    pub fn locations(&self, job: &PlannedJob) -> Result<JobLocations> {
        let task = self.task(&job.key().task)?;
        let builder = ScriptBuilder::new(&self.config, &self.renderer);
        let paths = self.job_paths(&job.instance);
        let (_, locations) = builder.context(
            task,
            &job.host,
            &self.hosts.config(&job.host),
            &job.instance,
            &paths,
        )?;
        Ok(locations)
    }

    fn cycle_label(&self, instance: &JobInstance) -> Option<String> {
        instance
            .cycle_index
            .and_then(|i| self.config.workflow.cycles.as_ref()?.get(i))
            .map(|c| c.label.clone())
    }

    fn new_record(&self, job: &PlannedJob, status: JobStatus) -> JobRecord {
        let paths = self.job_paths(&job.instance);
        JobRecord {
            key: job.key().clone(),
            cycle_label: self.cycle_label(&job.instance),
            external_id: None,
            status,
            exit_code: None,
            host: job.host.clone(),
            submission_dir: paths.submission_dir,
            run_dir: None,
            log_dir: paths.log_dir,
            submitted_at: None,
            updated_at: Utc::now(),
            poll_failures: 0,
        }
    }

    // -----------------------------------------------------------------------
    // run
    // -----------------------------------------------------------------------

    /// Submit every job that needs it, then follow them until the workflow
    /// completes or nothing can progress any more.
    pub async fn run(&self, mode: RunMode) -> Result<RunReport> {
        let jobs = self.jobs();
        info!(
            jobs = jobs.len(),
            host = %self.host_name,
            dry_run = mode.dry_run,
            update = mode.update,
            "starting run"
        );

        let mut records = self.store.get(&JobFilter::all())?;
        if !mode.dry_run {
            for record in records.iter_mut() {
                if record.status == JobStatus::Unknown && record.external_id.is_some() {
                    let fresh = self.refresh(record.clone()).await?;
                    if fresh != *record {
                        self.store.upsert(fresh.clone())?;
                    }
                    *record = fresh;
                }
            }
        }

        let mut core = CoreRun::new(
            jobs,
            records,
            mode.update,
            self.config.workflow.run.stop_on_error,
        );
        let mut report = RunReport::default();

        loop {
            let pass = self.run_pass(&mut core, mode, &mut report).await?;
            debug!(?pass, "scheduling pass done");
            if core.is_complete() {
                break;
            }
            if core.is_stalled(&pass) {
                info!("no job can progress any more");
                break;
            }
            if core.is_halted() && pass.tracked == 0 {
                warn!("stopping on error");
                break;
            }
            if pass.tracked > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        let blocked: Vec<PlannedJob> = core.blocked().cloned().collect();
        for job in blocked.iter() {
            let needs_write = core
                .record(job.key())
                .is_none_or(|r| r.status != JobStatus::Pending);
            if needs_write {
                let record = self.new_record(job, JobStatus::Pending);
                if !mode.dry_run {
                    self.store.upsert(record.clone())?;
                }
                core.apply(record);
            }
            info!(job = %job.key(), "left pending");
            report.pending.push(job.key().clone());
        }

        for record in core.records() {
            if record.status.is_failure() {
                report.failed.push(record.key.clone());
            }
        }
        info!(
            submitted = report.submitted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            pending = report.pending.len(),
            "run finished"
        );
        Ok(report)
    }

    async fn run_pass(
        &self,
        core: &mut CoreRun,
        mode: RunMode,
        report: &mut RunReport,
    ) -> Result<PassSummary> {
        let mut pass = PassSummary::default();
        for index in 0..core.jobs().len() {
            let job = core.jobs()[index].clone();
            let host = self.hosts.get(&job.host)?;
            match core.step(index, host.max_jobs()) {
                JobAction::Done => {}
                JobAction::Skip => {
                    debug!(job = %job.key(), "already succeeded; skipping");
                    report.skipped.push(job.key().clone());
                }
                JobAction::Defer(reason) => {
                    debug!(job = %job.key(), ?reason, "deferred");
                    pass.deferred += 1;
                }
                JobAction::Track => {
                    pass.tracked += 1;
                    let Some(mut record) = core.record(job.key()).cloned() else {
                        continue;
                    };
                    if mode.dry_run {
                        info!(job = %job.key(), status = %record.status, "would keep tracking");
                        record.transition(JobStatus::Succeeded);
                        core.apply(record);
                        continue;
                    }
                    let previous = record.status;
                    let record = self.refresh(record).await?;
                    if record.status != previous || record.poll_failures > 0 {
                        self.store.upsert(record.clone())?;
                    }
                    core.apply(record);
                }
                JobAction::Submit => {
                    pass.submitted += 1;
                    report.submitted.push(job.key().clone());
                    let record = self.submit(&job, host.as_ref(), mode).await?;
                    if !mode.dry_run {
                        self.store.upsert(record.clone())?;
                    }
                    core.apply(record);
                }
            }
        }
        Ok(pass)
    }

    /// Render, write and submit one job. Rendering and submission failures
    /// end up as `SUBMIT_FAILED`; store and filesystem errors are fatal.
    async fn submit(&self, job: &PlannedJob, host: &dyn Host, mode: RunMode) -> Result<JobRecord> {
        let mut record = self.new_record(job, JobStatus::Submitted);
        let task = self.task(&job.key().task)?;
        let host_cfg = self.hosts.config(&job.host);
        let paths = self.job_paths(&job.instance);

        let builder = ScriptBuilder::new(&self.config, &self.renderer);
        let rendered = match builder.render(
            task,
            &job.host,
            &host_cfg,
            &job.instance,
            &paths,
            self.env_lookup.as_ref(),
        ) {
            Ok(rendered) => rendered,
            Err(e @ (WoomError::TemplateRender(_) | WoomError::Config(_))) => {
                warn!(job = %job.key(), error = %e, "cannot render job script");
                record.transition(JobStatus::SubmitFailed);
                return Ok(record);
            }
            Err(e) => return Err(e),
        };
        record.run_dir = rendered.locations.run_dir.clone();

        let mut options = task.submit.clone();
        options.queue = options.queue.map(|q| host_cfg.queue(&q));
        let request = SubmitRequest {
            job_name: job_name(job),
            script_path: paths.script_path(),
            submission_dir: paths.submission_dir.clone(),
            stdout_path: paths.stdout_path(),
            stderr_path: paths.stderr_path(),
            options,
        };

        if mode.dry_run {
            info!(job = %job.key(), host = %job.host, "would submit");
            debug!(command = %host.submit_command(&request).join(" "), "submission command");
            debug!(script = %rendered.script, "job script");
            record.transition(JobStatus::Succeeded);
            return Ok(record);
        }

        write_script(&paths, &rendered)?;
        match self
            .retry
            .call(host.name(), "submit", || host.submit(&request))
            .await
        {
            Ok(id) => {
                info!(
                    task = %job.key().task,
                    cycle = ?job.key().cycle,
                    member = ?job.key().member,
                    jobid = %id,
                    host = %job.host,
                    "submitted"
                );
                record.external_id = Some(id);
                record.submitted_at = Some(Utc::now());
            }
            Err(e) => {
                warn!(job = %job.key(), error = %e, "submission failed");
                record.transition(JobStatus::SubmitFailed);
            }
        }
        Ok(record)
    }

    /// Fresh status of a submitted job.
    ///
    /// The status file written by the job's exit trap wins; otherwise the
    /// host is asked. Poll failures leave the status alone until retries
    /// are exhausted, then mark the job `UNKNOWN`.
    pub async fn refresh(&self, mut record: JobRecord) -> Result<JobRecord> {
        if let Some(code) = read_exit_status(&record.submission_dir) {
            return Ok(finish(record, code));
        }
        let Some(id) = record.external_id.clone() else {
            return Ok(record);
        };
        let host = self.hosts.get(&record.host)?;

        match self.retry.call(host.name(), "poll", || host.poll(&id)).await {
            Ok(state) => {
                record.poll_failures = 0;
                let status = match state {
                    HostJobState::Queued => JobStatus::Submitted,
                    HostJobState::Running => JobStatus::Running,
                    HostJobState::Done | HostJobState::Gone => {
                        // The trap may have run between both checks.
                        if let Some(code) = read_exit_status(&record.submission_dir) {
                            return Ok(finish(record, code));
                        }
                        JobStatus::Failed
                    }
                };
                if status != record.status {
                    debug!(job = %record.key, jobid = %id, %status, "status changed");
                    record.transition(status);
                }
            }
            Err(e) => {
                warn!(job = %record.key, jobid = %id, error = %e, "poll failed; status unknown");
                record.poll_failures += 1;
                record.transition(JobStatus::Unknown);
            }
        }
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // status / kill / clean
    // -----------------------------------------------------------------------

    /// Records matching `filter`, polled first when `refresh` is set.
    pub async fn status(&self, filter: &JobFilter, refresh: bool) -> Result<Vec<JobRecord>> {
        let records = self.store.get(filter)?;
        if !refresh {
            return Ok(records);
        }
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let pollable = record.status.is_active()
                || (record.status == JobStatus::Unknown && record.external_id.is_some());
            if !pollable {
                out.push(record);
                continue;
            }
            let before = record.clone();
            let record = self.refresh(record).await?;
            if record != before {
                self.store.upsert(record.clone())?;
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Kill every matching job that is not terminal.
    ///
    /// Best effort: a failing host call is logged and the record is marked
    /// `KILLED` anyway. Each external id is killed once.
    pub async fn kill(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let mut killed = Vec::new();
        let mut seen: Vec<(String, String)> = Vec::new();
        for mut record in self.store.get(filter)? {
            if record.status.is_terminal() {
                continue;
            }
            if let Some(id) = record.external_id.clone() {
                let pair = (record.host.clone(), id.clone());
                if !seen.contains(&pair) {
                    seen.push(pair);
                    match self.hosts.get(&record.host) {
                        Ok(host) => {
                            if let Err(e) = self
                                .retry
                                .call(host.name(), "kill", || host.kill(&id))
                                .await
                            {
                                warn!(job = %record.key, jobid = %id, error = %e, "kill failed");
                            }
                        }
                        Err(e) => warn!(job = %record.key, error = %e, "cannot kill"),
                    }
                }
            }
            info!(job = %record.key, jobid = ?record.external_id, "killed");
            record.transition(JobStatus::Killed);
            self.store.upsert(record.clone())?;
            killed.push(record);
        }
        Ok(killed)
    }

    /// Kill, then remove files, then forget the matching jobs.
    pub async fn clean(&self, filter: &JobFilter, scope: &CleanScope) -> Result<CleanReport> {
        let mut report = CleanReport::default();
        let records = self.store.get(filter)?;

        if !scope.dry_run {
            report.killed = self.kill(filter).await?;
        } else {
            report.killed = records
                .iter()
                .filter(|r| !r.status.is_terminal())
                .cloned()
                .collect();
        }

        let mut targets: Vec<PathBuf> = Vec::new();
        for record in records.iter() {
            if scope.submission_dirs {
                targets.push(record.submission_dir.clone());
            }
            if scope.log_dirs {
                targets.push(record.log_dir.clone());
            }
            if scope.run_dirs {
                if let Some(dir) = &record.run_dir {
                    targets.push(dir.clone());
                }
            }
        }
        if scope.artifacts {
            for job in self.jobs() {
                if !records.iter().any(|r| &r.key == job.key()) {
                    continue;
                }
                match self.locations(&job) {
                    Ok(loc) => targets.extend(loc.artifacts.into_values()),
                    Err(e) => warn!(job = %job.key(), error = %e, "cannot resolve artifacts"),
                }
            }
        }
        for pattern in scope.patterns.iter() {
            targets.extend(glob_paths(&self.config.workflow_dir, pattern)?);
        }
        targets.sort();
        targets.dedup();

        for path in targets {
            if !path.exists() {
                continue;
            }
            if scope.dry_run {
                info!(path = %path.display(), "would remove");
            } else {
                remove_path(&path)?;
                info!(path = %path.display(), "removed");
            }
            report.removed.push(path);
        }

        if !scope.dry_run {
            report.deleted = self.store.delete(filter)?;
        }
        Ok(report)
    }
}

/// Scheduler-visible name: task, cycle index and member label.
fn job_name(job: &PlannedJob) -> String {
    let mut name = job.key().task.clone();
    if let Some(ci) = job.instance.cycle_index {
        name.push_str(&format!(".c{ci}"));
    }
    if let Some(member) = job.key().member {
        name.push_str(&format!(".m{member}"));
    }
    name
}

/// Exit status written by the job's trap, if the job finished.
fn read_exit_status(submission_dir: &Path) -> Option<i32> {
    let path = submission_dir.join(crate::paths::STATUS_FILE);
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

fn finish(mut record: JobRecord, code: i32) -> JobRecord {
    record.exit_code = Some(code);
    record.poll_failures = 0;
    let status = if code == 0 {
        JobStatus::Succeeded
    } else {
        JobStatus::Failed
    };
    debug!(job = %record.key, exit_code = code, %status, "job finished");
    record.transition(status);
    record
}

fn glob_paths(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = base.join(pattern);
    let full = full.to_string_lossy();
    let paths = glob::glob(&full)
        .map_err(|e| WoomError::config(format!("invalid clean pattern '{pattern}': {e}")))?;
    Ok(paths.filter_map(|p| p.ok()).collect())
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
