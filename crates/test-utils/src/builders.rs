#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use woom::config::{
    Config, HostConfig, HostsConfig, RawHostsConfig, RawTaskConfig, RawTasksConfig,
    RawWorkflowConfig, SubmitOptions, TasksConfig, WorkflowConfig,
};
use woom::config::model::{CyclesSection, DependencySpec, EnsembleSection, RunSection};
use woom::errors::Result;

/// Builder for a validated [`Config`] rooted at a given workflow directory.
///
/// Polling and retries default to millisecond delays so that runs finish
/// quickly in tests.
pub struct ConfigBuilder {
    workflow_dir: PathBuf,
    workflow: RawWorkflowConfig,
    tasks: RawTasksConfig,
    hosts: RawHostsConfig,
}

impl ConfigBuilder {
    pub fn new(workflow_dir: impl AsRef<Path>) -> Self {
        let workflow = RawWorkflowConfig {
            run: RunSection {
                poll_interval: "5ms".into(),
                retry_attempts: 2,
                retry_initial_delay: "1ms".into(),
                retry_max_delay: "2ms".into(),
                host_timeout: "2s".into(),
                lock_timeout: "2s".into(),
                ..RunSection::default()
            },
            ..RawWorkflowConfig::default()
        };
        Self {
            workflow_dir: workflow_dir.as_ref().to_path_buf(),
            workflow,
            tasks: RawTasksConfig::default(),
            hosts: RawHostsConfig::default(),
        }
    }

    pub fn app(mut self, name: &str) -> Self {
        self.workflow.app.name = Some(name.to_string());
        self
    }

    /// Daily cycles between two dates.
    pub fn daily_cycles(mut self, begin: &str, end: &str) -> Self {
        self.workflow.cycles = Some(CyclesSection {
            begin: Some(begin.to_string()),
            end: Some(end.to_string()),
            freq: Some("1D".to_string()),
            ..CyclesSection::default()
        });
        self
    }

    pub fn independent_cycles(mut self, indep: bool) -> Self {
        if let Some(cycles) = self.workflow.cycles.as_mut() {
            cycles.indep = indep;
        }
        self
    }

    pub fn ensemble(mut self, size: u32) -> Self {
        self.workflow.ensemble = Some(EnsembleSection {
            size,
            first_id: 1,
            iters: BTreeMap::new(),
        });
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.workflow
            .params
            .insert(key.to_string(), toml::Value::String(value.to_string()));
        self
    }

    pub fn stop_on_error(mut self) -> Self {
        self.workflow.run.stop_on_error = true;
        self
    }

    pub fn task(mut self, name: &str, task: RawTaskConfig) -> Self {
        self.tasks.task.insert(name.to_string(), task);
        self
    }

    pub fn host(mut self, name: &str, host: HostConfig) -> Self {
        self.hosts.host.insert(name.to_string(), host);
        self
    }

    pub fn try_build(self) -> Result<Config> {
        Ok(Config {
            workflow_dir: self.workflow_dir,
            workflow: WorkflowConfig::try_from(self.workflow)?,
            tasks: TasksConfig::try_from(self.tasks)?,
            hosts: HostsConfig::try_from(self.hosts)?,
        })
    }

    pub fn build(self) -> Config {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// Builder for a raw `[task.<name>]` section.
pub struct TaskBuilder {
    task: RawTaskConfig,
}

impl TaskBuilder {
    pub fn new(commandline: &str) -> Self {
        Self {
            task: RawTaskConfig {
                commandline: Some(commandline.to_string()),
                ..RawTaskConfig::default()
            },
        }
    }

    pub fn after(mut self, task: &str) -> Self {
        self.task
            .after
            .get_or_insert_with(Vec::new)
            .push(DependencySpec::Name(task.to_string()));
        self
    }

    pub fn after_offset(mut self, task: &str, cycle_offset: i64) -> Self {
        self.task
            .after
            .get_or_insert_with(Vec::new)
            .push(DependencySpec::Detailed {
                task: task.to_string(),
                cycle_offset,
            });
        self
    }

    pub fn cycles(mut self, cycles: bool) -> Self {
        self.task.cycles = Some(cycles);
        self
    }

    pub fn members(mut self, members: bool) -> Self {
        self.task.members = Some(members);
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.task.host = Some(host.to_string());
        self
    }

    pub fn run_dir(mut self, run_dir: &str) -> Self {
        self.task.run_dir = Some(run_dir.to_string());
        self
    }

    pub fn artifact(mut self, name: &str, path: &str) -> Self {
        self.task
            .artifacts
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), path.to_string());
        self
    }

    pub fn queue(mut self, queue: &str) -> Self {
        self.task
            .submit
            .get_or_insert_with(SubmitOptions::default)
            .queue = Some(queue.to_string());
        self
    }

    pub fn build(self) -> RawTaskConfig {
        self.task
    }
}
