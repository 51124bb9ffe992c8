// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use globset::Glob;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{
    HostsConfig, RawHostsConfig, RawTaskConfig, RawTasksConfig, RawWorkflowConfig, RunOptions,
    RunSection, TaskConfig, TasksConfig, WorkflowConfig, LOCAL_HOST,
};
use crate::errors::{Result, WoomError};
use crate::iter::{gen_cycles, gen_ensemble, parse_date, parse_duration, CycleSpec, Freq};
use crate::paths::AppId;

impl TryFrom<RawWorkflowConfig> for WorkflowConfig {
    type Error = WoomError;

    fn try_from(raw: RawWorkflowConfig) -> std::result::Result<Self, Self::Error> {
        let cycles = match raw.cycles.as_ref() {
            Some(section) => {
                let spec = CycleSpec {
                    begin: section.begin.as_deref().map(parse_date).transpose()?,
                    end: section.end.as_deref().map(parse_date).transpose()?,
                    freq: section.freq.as_deref().map(str::parse::<Freq>).transpose()?,
                    ncycles: section.ncycles,
                    round: section.round.as_deref().map(parse_duration).transpose()?,
                };
                Some(gen_cycles(&spec)?)
            }
            None => None,
        };

        let members = raw
            .ensemble
            .as_ref()
            .map(|e| gen_ensemble(e.size, e.first_id, &e.iters))
            .transpose()?;

        let params = raw
            .params
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    toml::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();

        Ok(WorkflowConfig {
            app: AppId {
                name: raw.app.name,
                conf: raw.app.conf,
                exp: raw.app.exp,
            },
            indep_cycles: raw.cycles.map(|c| c.indep).unwrap_or(false),
            cycles,
            members,
            params,
            env_vars: raw.env_vars,
            run: parse_run_section(&raw.run)?,
        })
    }
}

fn parse_run_section(run: &RunSection) -> Result<RunOptions> {
    let std_duration = |field: &str, value: &str| -> Result<std::time::Duration> {
        parse_duration(value)?
            .to_std()
            .map_err(|_| WoomError::config(format!("[run].{field} must not be negative")))
    };

    if run.retry_attempts == 0 {
        return Err(WoomError::config("[run].retry_attempts must be >= 1 (got 0)"));
    }

    Ok(RunOptions {
        poll_interval: std_duration("poll_interval", &run.poll_interval)?,
        stop_on_error: run.stop_on_error,
        retry_attempts: run.retry_attempts,
        retry_initial_delay: std_duration("retry_initial_delay", &run.retry_initial_delay)?,
        retry_max_delay: std_duration("retry_max_delay", &run.retry_max_delay)?,
        host_timeout: std_duration("host_timeout", &run.host_timeout)?,
        lock_timeout: std_duration("lock_timeout", &run.lock_timeout)?,
    })
}

impl TryFrom<RawTasksConfig> for TasksConfig {
    type Error = WoomError;

    fn try_from(raw: RawTasksConfig) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let mut tasks = BTreeMap::new();
        for name in raw.task.keys() {
            let resolved = resolve_inheritance(&raw, name)?;
            tasks.insert(name.clone(), finalize_task(name, resolved)?);
        }
        validate_task_dependencies(&tasks)?;
        validate_artifacts(&tasks)?;
        validate_dag(&tasks)?;
        Ok(TasksConfig::new_unchecked(tasks))
    }
}

fn ensure_has_tasks(cfg: &RawTasksConfig) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(WoomError::config(
            "tasks config must contain at least one [task.<name>] section",
        ));
    }
    Ok(())
}

/// Merge a task with its `inherit` chain; fields set on the child win.
fn resolve_inheritance(cfg: &RawTasksConfig, name: &str) -> Result<RawTaskConfig> {
    let mut chain: Vec<&str> = vec![name];
    let mut merged = cfg.task[name].clone();

    while let Some(parent) = merged.inherit.take() {
        if chain.contains(&parent.as_str()) {
            return Err(WoomError::config(format!(
                "inheritance loop for task '{name}': {} -> {parent}",
                chain.join(" -> ")
            )));
        }
        let (parent_name, parent_cfg) = cfg.task.get_key_value(&parent).ok_or_else(|| {
            WoomError::config(format!(
                "task '{}' inherits from unknown task '{parent}'",
                chain.last().copied().unwrap_or(name)
            ))
        })?;
        chain.push(parent_name.as_str());

        merged = RawTaskConfig {
            commandline: merged.commandline.or_else(|| parent_cfg.commandline.clone()),
            inherit: parent_cfg.inherit.clone(),
            cycles: merged.cycles.or(parent_cfg.cycles),
            members: merged.members.or(parent_cfg.members),
            after: merged.after.or_else(|| parent_cfg.after.clone()),
            env: merged.env.or_else(|| parent_cfg.env.clone()),
            host: merged.host.or_else(|| parent_cfg.host.clone()),
            run_dir: merged.run_dir.or_else(|| parent_cfg.run_dir.clone()),
            artifacts: merged.artifacts.or_else(|| parent_cfg.artifacts.clone()),
            submit: merged.submit.or_else(|| parent_cfg.submit.clone()),
        };
    }
    Ok(merged)
}

fn finalize_task(name: &str, raw: RawTaskConfig) -> Result<TaskConfig> {
    let commandline = raw
        .commandline
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| WoomError::config(format!("task '{name}' has no commandline")))?;

    Ok(TaskConfig {
        name: name.to_string(),
        commandline,
        cycles: raw.cycles.unwrap_or(true),
        members: raw.members.unwrap_or(true),
        after: raw
            .after
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect(),
        env: raw.env,
        host: raw.host,
        run_dir: raw.run_dir.filter(|d| !d.trim().is_empty()),
        artifacts: raw.artifacts.unwrap_or_default(),
        submit: raw.submit.unwrap_or_default(),
    })
}

fn validate_task_dependencies(tasks: &BTreeMap<String, TaskConfig>) -> Result<()> {
    for (name, task) in tasks.iter() {
        let mut seen = BTreeSet::new();
        for dep in task.after.iter() {
            let Some(dep_task) = tasks.get(&dep.task) else {
                return Err(WoomError::config(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    name, dep.task
                )));
            };
            if dep.cycle_offset > 0 {
                return Err(WoomError::config(format!(
                    "task '{}' cannot depend on a later cycle of '{}' (cycle_offset = {})",
                    name, dep.task, dep.cycle_offset
                )));
            }
            if dep.cycle_offset != 0 && !(task.cycles && dep_task.cycles) {
                return Err(WoomError::config(format!(
                    "task '{}' uses a cycle_offset on '{}' but both tasks must cycle",
                    name, dep.task
                )));
            }
            if dep.task == *name && dep.cycle_offset == 0 {
                return Err(WoomError::config(format!(
                    "task '{}' cannot depend on itself in `after`",
                    name
                )));
            }
            if !seen.insert((dep.task.as_str(), dep.cycle_offset)) {
                return Err(WoomError::config(format!(
                    "task '{}' lists dependency '{}' twice",
                    name, dep.task
                )));
            }
        }
    }
    Ok(())
}

fn validate_artifacts(tasks: &BTreeMap<String, TaskConfig>) -> Result<()> {
    for (name, task) in tasks.iter() {
        if task.run_dir.is_some() {
            continue;
        }
        for (artifact, path) in task.artifacts.iter() {
            if !Path::new(path).is_absolute() && !path.starts_with("{{") {
                return Err(WoomError::config(format!(
                    "artifact '{artifact}' of task '{name}' is a relative path \
                     and the task has no run_dir"
                )));
            }
        }
    }
    Ok(())
}

fn validate_dag(tasks: &BTreeMap<String, TaskConfig>) -> Result<()> {
    // Edge direction: dep -> task. Dependencies on earlier cycles cannot
    // close a loop between jobs, so only same-cycle edges count here.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in tasks.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in tasks.iter() {
        for dep in task.after.iter().filter(|d| d.cycle_offset == 0) {
            graph.add_edge(dep.task.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(WoomError::config(format!(
            "cycle detected in task dependencies involving task '{}'",
            cycle.node_id()
        ))),
    }
}

impl TryFrom<RawHostsConfig> for HostsConfig {
    type Error = WoomError;

    fn try_from(raw: RawHostsConfig) -> std::result::Result<Self, Self::Error> {
        let mut hosts = raw.host;
        for (name, host) in hosts.iter() {
            for pattern in host.patterns.iter() {
                Glob::new(pattern).map_err(|e| {
                    WoomError::config(format!(
                        "host '{name}' has an invalid pattern '{pattern}': {e}"
                    ))
                })?;
            }
            if host.max_jobs == Some(0) {
                return Err(WoomError::config(format!(
                    "host '{name}': max_jobs must be >= 1 (got 0)"
                )));
            }
        }
        hosts.entry(LOCAL_HOST.to_string()).or_default();
        Ok(HostsConfig::new_unchecked(hosts))
    }
}
