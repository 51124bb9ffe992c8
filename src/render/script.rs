// src/render/script.rs

//! `job.sh` generation.
//!
//! Layout of a script:
//! 1. exit trap writing `$?` to `job.status`
//! 2. `WOOM_*` exports, workflow `env_vars`, workflow-relative path prepends
//! 3. the task environment block ([`env_block`])
//! 4. `cd` to the run directory
//! 5. the rendered command line
//! 6. artifact checks

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{Config, EnvConfig, HostConfig, TaskConfig};
use crate::dag::JobInstance;
use crate::errors::{Result, WoomError};
use crate::paths::JobPaths;
use crate::render::context::{resolve_path, JobContext};
use crate::render::env::{env_block, prepend_line, quote, quote_literal, EnvLookup};
use crate::render::template::TemplateRenderer;

/// Workflow-relative directories prepended to search paths.
pub const PATH_PREPENDS: [(&str, &str); 4] = [
    ("PATH", "bin"),
    ("PYTHONPATH", "lib/python"),
    ("LIBRARY_PATH", "lib"),
    ("INCLUDE_PATH", "include"),
];

/// Where a job runs and what it must leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLocations {
    /// The task's own run directory, if it declares one.
    pub run_dir: Option<PathBuf>,
    /// Directory the command line runs in: `run_dir`, or the submission dir.
    pub work_dir: PathBuf,
    pub artifacts: BTreeMap<String, PathBuf>,
}

/// A rendered job, ready to be written and submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedJob {
    pub script: String,
    pub locations: JobLocations,
}

/// Builds job scripts for one workflow.
#[derive(Debug, Clone, Copy)]
pub struct ScriptBuilder<'a> {
    config: &'a Config,
    renderer: &'a TemplateRenderer,
}

impl<'a> ScriptBuilder<'a> {
    pub fn new(config: &'a Config, renderer: &'a TemplateRenderer) -> Self {
        Self { config, renderer }
    }

    /// Variables of `job`, `rundir` included.
    pub fn context(
        &self,
        task: &TaskConfig,
        host_name: &str,
        host: &HostConfig,
        job: &JobInstance,
        paths: &JobPaths,
    ) -> Result<(JobContext, JobLocations)> {
        let mut ctx = JobContext::new(
            &self.config.workflow_dir,
            &self.config.workflow,
            host_name,
            host,
            job,
            paths,
        )?;
        let locations = self.locations(task, &ctx, paths)?;
        ctx.set_run_dir(&locations.work_dir);
        Ok((ctx, locations))
    }

    fn locations(
        &self,
        task: &TaskConfig,
        ctx: &JobContext,
        paths: &JobPaths,
    ) -> Result<JobLocations> {
        let run_dir = match task.run_dir.as_deref() {
            Some(template) => {
                let rendered = self.renderer.render(template, ctx.vars())?;
                Some(resolve_path(&self.config.workflow_dir, rendered.trim()))
            }
            None => None,
        };
        let work_dir = run_dir
            .clone()
            .unwrap_or_else(|| paths.submission_dir.clone());

        let mut artifacts = BTreeMap::new();
        for (name, template) in task.artifacts.iter() {
            let rendered = self.renderer.render(template, ctx.vars())?;
            artifacts.insert(name.clone(), resolve_path(&work_dir, rendered.trim()));
        }

        Ok(JobLocations {
            run_dir,
            work_dir,
            artifacts,
        })
    }

    /// Render the full script of `job`.
    pub fn render(
        &self,
        task: &TaskConfig,
        host_name: &str,
        host: &HostConfig,
        job: &JobInstance,
        paths: &JobPaths,
        lookup: EnvLookup<'_>,
    ) -> Result<RenderedJob> {
        let (ctx, locations) = self.context(task, host_name, host, job, paths)?;
        let commandline = self.renderer.render(&task.commandline, ctx.vars())?;

        let env = match task.env.as_deref() {
            Some(name) => host.envs.get(name).cloned().ok_or_else(|| {
                WoomError::config(format!(
                    "task '{}': environment '{name}' is not declared for host '{host_name}'",
                    task.name
                ))
            })?,
            None => EnvConfig::default(),
        };

        let mut lines = vec![
            "#!/bin/bash".to_string(),
            format!("# {}", paths.task_path),
            String::new(),
            format!(
                "trap 'echo $? > {}' EXIT",
                quote_literal(&paths.status_path().display().to_string())
            ),
            String::new(),
        ];

        for (name, value) in ctx.env_vars() {
            lines.push(format!("export {name}={}", quote_literal(&value)));
        }
        for (name, value) in self.config.workflow.env_vars.iter() {
            lines.push(format!("export {name}={}", quote(value)));
        }
        for (name, sub) in PATH_PREPENDS {
            let dir = self.config.workflow_dir.join(sub);
            lines.push(prepend_line(name, &dir.display().to_string()));
        }

        let block = env_block(host, &env, lookup);
        if !block.is_empty() {
            lines.push(String::new());
            lines.extend(block);
        }

        let work_dir = quote_literal(&locations.work_dir.display().to_string());
        lines.extend([
            String::new(),
            "set -e".to_string(),
            format!("mkdir -p {work_dir}"),
            format!("cd {work_dir}"),
            String::new(),
            commandline.trim_end().to_string(),
        ]);

        if !locations.artifacts.is_empty() {
            lines.push(String::new());
            for (name, path) in locations.artifacts.iter() {
                let path = path.display().to_string();
                lines.push(format!(
                    "test -f {} || {{ echo {} >&2; exit 1; }}",
                    quote_literal(&path),
                    quote_literal(&format!("missing artifact {name}: {path}"))
                ));
            }
        }

        let mut script = lines.join("\n");
        script.push('\n');

        Ok(RenderedJob { script, locations })
    }
}

/// Write `job.sh` into a fresh submission directory and create the log dir.
///
/// A `job.status` left by an earlier submission is removed so that it is
/// not mistaken for the outcome of the new one.
pub fn write_script(paths: &JobPaths, rendered: &RenderedJob) -> Result<PathBuf> {
    fs::create_dir_all(&paths.submission_dir)?;
    fs::create_dir_all(&paths.log_dir)?;
    remove_if_exists(&paths.status_path())?;
    let script_path = paths.script_path();
    fs::write(&script_path, &rendered.script)?;
    debug!(path = %script_path.display(), "wrote job script");
    Ok(script_path)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
