// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{
    Config, ConfigOverrides, HostsConfig, RawHostsConfig, RawTasksConfig, RawWorkflowConfig,
    TasksConfig, WorkflowConfig,
};
use crate::errors::{Result, WoomError};

/// Default file names, looked up in the current directory.
pub const DEFAULT_WORKFLOW_CFG: &str = "workflow.toml";
pub const DEFAULT_TASKS_CFG: &str = "tasks.toml";
pub const DEFAULT_HOSTS_CFG: &str = "hosts.toml";

/// Where the three configuration files live.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub workflow: PathBuf,
    pub tasks: PathBuf,
    /// Optional: without a hosts file only the built-in `local` host exists.
    pub hosts: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self {
            workflow: PathBuf::from(DEFAULT_WORKFLOW_CFG),
            tasks: PathBuf::from(DEFAULT_TASKS_CFG),
            hosts: None,
        }
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).map_err(|e| {
        WoomError::config(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Load `workflow.toml` without semantic validation.
pub fn load_workflow_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowConfig> {
    read_toml(path.as_ref())
}

/// Load `tasks.toml` without semantic validation.
pub fn load_tasks_from_path(path: impl AsRef<Path>) -> Result<RawTasksConfig> {
    read_toml(path.as_ref())
}

/// Load `hosts.toml` without semantic validation.
pub fn load_hosts_from_path(path: impl AsRef<Path>) -> Result<RawHostsConfig> {
    read_toml(path.as_ref())
}

/// Apply command-line overrides on top of the file values.
pub fn apply_overrides(raw: &mut RawWorkflowConfig, overrides: &ConfigOverrides) {
    if let Some(name) = &overrides.app_name {
        raw.app.name = Some(name.clone());
    }
    if let Some(conf) = &overrides.app_conf {
        raw.app.conf = Some(conf.clone());
    }
    if let Some(exp) = &overrides.app_exp {
        raw.app.exp = Some(exp.clone());
    }

    let touches_cycles = overrides.begin.is_some()
        || overrides.end.is_some()
        || overrides.freq.is_some()
        || overrides.ncycles.is_some();
    if !touches_cycles {
        return;
    }
    let cycles = raw.cycles.get_or_insert_with(Default::default);
    if let Some(begin) = &overrides.begin {
        cycles.begin = Some(begin.clone());
    }
    if let Some(end) = &overrides.end {
        cycles.end = Some(end.clone());
    }
    if let Some(freq) = &overrides.freq {
        cycles.freq = Some(freq.clone());
        cycles.ncycles = None;
    }
    if let Some(n) = overrides.ncycles {
        cycles.ncycles = Some(n);
        if overrides.freq.is_none() && cycles.end.is_some() {
            cycles.freq = None;
        }
    }
}

/// Load and validate all configuration files.
///
/// The workflow directory is the directory holding the workflow file.
/// Fails with [`WoomError::Config`] on any problem, before anything is
/// submitted.
pub fn load_and_validate(paths: &ConfigPaths, overrides: &ConfigOverrides) -> Result<Config> {
    let mut raw_workflow = load_workflow_from_path(&paths.workflow)?;
    apply_overrides(&mut raw_workflow, overrides);
    let workflow = WorkflowConfig::try_from(raw_workflow)?;

    let tasks = TasksConfig::try_from(load_tasks_from_path(&paths.tasks)?)?;

    let hosts = match &paths.hosts {
        Some(path) => HostsConfig::try_from(load_hosts_from_path(path)?)?,
        None => {
            let default_path = paths
                .workflow
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(DEFAULT_HOSTS_CFG);
            if default_path.is_file() {
                HostsConfig::try_from(load_hosts_from_path(&default_path)?)?
            } else {
                HostsConfig::default()
            }
        }
    };

    validate_cross_refs(&workflow, &tasks)?;

    Ok(Config {
        workflow_dir: workflow_dir_of(&paths.workflow)?,
        workflow,
        tasks,
        hosts,
    })
}

fn validate_cross_refs(workflow: &WorkflowConfig, tasks: &TasksConfig) -> Result<()> {
    if workflow.cycles.is_none() {
        for (name, task) in tasks.iter() {
            if task.after.iter().any(|d| d.cycle_offset != 0) {
                return Err(WoomError::config(format!(
                    "task '{name}' uses a cycle_offset but the workflow has no [cycles]"
                )));
            }
        }
    }
    Ok(())
}

fn workflow_dir_of(workflow_cfg: &Path) -> Result<PathBuf> {
    let dir = match workflow_cfg.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(std::path::absolute(dir)?)
}
