// src/render/context.rs

//! Per-job variables, shared by templates and the exported `WOOM_*`
//! environment.
//!
//! Every template variable `foo_bar` is exported as `WOOM_FOO_BAR`, so a
//! command line can use either `{{ cycle_token }}` or `$WOOM_CYCLE_TOKEN`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{HostConfig, WorkflowConfig};
use crate::dag::JobInstance;
use crate::errors::{Result, WoomError};
use crate::iter::Cycle;
use crate::paths::JobPaths;
use crate::render::template::Context;

/// Prefix of exported variables.
pub const ENV_PREFIX: &str = "WOOM_";

/// Template variables of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContext {
    vars: Context,
}

impl JobContext {
    /// Assemble the variables of `job` running on a host described by `host`.
    ///
    /// `rundir` is not set here: it is itself rendered from this context
    /// and added with [`JobContext::set_run_dir`].
    pub fn new(
        workflow_dir: &Path,
        workflow: &WorkflowConfig,
        host_name: &str,
        host: &HostConfig,
        job: &JobInstance,
        paths: &JobPaths,
    ) -> Result<Self> {
        let mut vars = Context::new();

        // Params and host dirs first, so that built-in names win.
        for (key, value) in workflow.params.iter() {
            vars.insert(key.to_lowercase(), value.clone());
        }
        for (name, dir) in host.dirs.iter() {
            vars.insert(format!("{}_dir", name.to_lowercase()), expand_dir(dir)?);
        }

        let app = &workflow.app;
        vars.insert("app_name".into(), app.name.clone().unwrap_or_default());
        vars.insert("app_conf".into(), app.conf.clone().unwrap_or_default());
        vars.insert("app_exp".into(), app.exp.clone().unwrap_or_default());
        vars.insert("app_path".into(), app.path());

        vars.insert("host_name".into(), host_name.to_string());
        vars.insert("task_name".into(), job.key.task.clone());
        vars.insert("task_path".into(), paths.task_path.clone());
        vars.insert("workflow_dir".into(), display(workflow_dir));
        vars.insert("submission_dir".into(), display(&paths.submission_dir));
        vars.insert("log_dir".into(), display(&paths.log_dir));

        let cycles = workflow.cycles.as_ref();
        if let Some(cycle) = job.cycle_index.and_then(|i| cycles?.get(i)) {
            insert_cycle(&mut vars, cycle, "");
            vars.insert("cycle_is_first".into(), flag(cycle.is_first));
            vars.insert("cycle_is_last".into(), flag(cycle.is_last));
            if let Some(prev) = cycle.prev.and_then(|i| cycles?.get(i)) {
                insert_cycle(&mut vars, prev, "_prev");
            }
            if let Some(next) = cycle.next.and_then(|i| cycles?.get(i)) {
                insert_cycle(&mut vars, next, "_next");
            }
        }

        let members = workflow.members.as_ref();
        if let Some(member) = job.member_index.and_then(|i| members?.get(i)) {
            vars.insert("nmembers".into(), member.nmembers.to_string());
            vars.insert("member".into(), member.id.to_string());
            vars.insert("member_label".into(), member.label());
            vars.insert("member_rank".into(), member.rank());
            for (name, value) in member.props.iter() {
                vars.insert(name.to_lowercase(), value.clone());
            }
        }

        Ok(Self { vars })
    }

    pub fn vars(&self) -> &Context {
        &self.vars
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn set_run_dir(&mut self, run_dir: &Path) {
        self.set("rundir", display(run_dir));
    }

    /// `WOOM_*` variables exported by the job script, sorted by name.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{}", k.to_uppercase()), v.clone()))
            .collect()
    }
}

fn insert_cycle(vars: &mut Context, cycle: &Cycle, suffix: &str) {
    vars.insert(format!("cycle_begin_date{suffix}"), cycle.begin_str());
    vars.insert(format!("cycle_end_date{suffix}"), cycle.end_str());
    vars.insert(format!("cycle_duration{suffix}"), cycle.duration_str());
    vars.insert(format!("cycle_token{suffix}"), cycle.token.clone());
    vars.insert(format!("cycle_label{suffix}"), cycle.label.clone());
}

fn flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Expand `~` and `$VAR` in a host directory.
pub fn expand_dir(dir: &str) -> Result<String> {
    shellexpand::full(dir)
        .map(|s| s.into_owned())
        .map_err(|e| WoomError::config(format!("cannot expand directory '{dir}': {e}")))
}

/// Resolve a possibly relative path against `base`.
pub fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawWorkflowConfig, TaskConfig};
    use crate::dag::job_at;

    fn workflow() -> WorkflowConfig {
        let raw: RawWorkflowConfig = toml::from_str(
            r#"
[app]
name = "manga"
exp = "exp1"

[cycles]
begin = "2024-01-01"
end = "2024-01-04"
freq = "1D"

[ensemble]
size = 2
[ensemble.iters]
seed = ["11", "22"]

[params]
domain = "bay"
"#,
        )
        .unwrap();
        WorkflowConfig::try_from(raw).unwrap()
    }

    fn task() -> TaskConfig {
        TaskConfig {
            name: "model".into(),
            commandline: "run".into(),
            cycles: true,
            members: true,
            after: Vec::new(),
            env: None,
            host: None,
            run_dir: None,
            artifacts: BTreeMap::new(),
            submit: Default::default(),
        }
    }

    fn context_at(cycle: usize, member: usize) -> JobContext {
        let wf = workflow();
        let job = job_at(&task(), &wf, Some(cycle), Some(member));
        let member_label = wf.members.as_ref().unwrap()[member].label();
        let paths = JobPaths::new(
            Path::new("/wf"),
            &wf.app,
            job.key.cycle.as_deref(),
            "model",
            Some(member_label.as_str()),
        );
        let mut host = HostConfig::default();
        host.dirs.insert("scratch".into(), "/scratch/me".into());
        JobContext::new(Path::new("/wf"), &wf, "local", &host, &job, &paths).unwrap()
    }

    #[test]
    fn cycle_member_and_paths_are_exposed() {
        let ctx = context_at(1, 0);
        let vars = ctx.vars();
        assert_eq!(vars["app_path"], "manga/exp1");
        assert_eq!(vars["cycle_begin_date"], "2024-01-02T00:00:00");
        assert_eq!(vars["cycle_begin_date_prev"], "2024-01-01T00:00:00");
        assert_eq!(vars["cycle_end_date_next"], "2024-01-04T00:00:00");
        assert_eq!(vars["cycle_is_first"], "0");
        assert_eq!(vars["member_label"], "member1");
        assert_eq!(vars["seed"], "11");
        assert_eq!(vars["domain"], "bay");
        assert_eq!(vars["scratch_dir"], "/scratch/me");
        assert_eq!(
            vars["task_path"],
            "manga/exp1/2024-01-02T00:00:00-2024-01-03T00:00:00/model/member1"
        );
    }

    #[test]
    fn boundaries_have_no_neighbour_variables() {
        let first = context_at(0, 1);
        assert!(!first.vars().contains_key("cycle_token_prev"));
        assert_eq!(first.vars()["cycle_is_first"], "1");

        let last = context_at(2, 1);
        assert!(!last.vars().contains_key("cycle_token_next"));
        assert_eq!(last.vars()["cycle_is_last"], "1");
    }

    #[test]
    fn env_vars_are_prefixed_and_upper_case() {
        let mut ctx = context_at(0, 0);
        ctx.set_run_dir(Path::new("/run"));
        let env = ctx.env_vars();
        assert_eq!(env["WOOM_RUNDIR"], "/run");
        assert_eq!(env["WOOM_TASK_NAME"], "model");
        assert_eq!(env["WOOM_SCRATCH_DIR"], "/scratch/me");
        assert_eq!(env["WOOM_NMEMBERS"], "2");
        assert!(env.keys().all(|k| k.starts_with(ENV_PREFIX)));
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        assert_eq!(resolve_path(Path::new("/a"), "b/c"), PathBuf::from("/a/b/c"));
        assert_eq!(resolve_path(Path::new("/a"), "/x"), PathBuf::from("/x"));
    }
}
