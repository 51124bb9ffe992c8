// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::iter::{CycleSeq, Member};
use crate::paths::AppId;
use crate::types::{SchedulerKind, VenvMode};

// ---------------------------------------------------------------------------
// workflow.toml
// ---------------------------------------------------------------------------

/// `workflow.toml` as read from disk.
///
/// ```toml
/// [app]
/// name = "manga"
///
/// [cycles]
/// begin = "2024-01-01"
/// end = "2024-01-04"
/// freq = "1D"
///
/// [ensemble]
/// size = 2
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawWorkflowConfig {
    #[serde(default)]
    pub app: AppSection,

    #[serde(default)]
    pub cycles: Option<CyclesSection>,

    #[serde(default)]
    pub ensemble: Option<EnsembleSection>,

    /// Free scalars exposed to templates and as `WOOM_<KEY>` variables.
    #[serde(default)]
    pub params: BTreeMap<String, toml::Value>,

    /// Extra environment variables exported in every job.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,

    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    pub conf: Option<String>,
    pub exp: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CyclesSection {
    pub begin: Option<String>,
    pub end: Option<String>,
    pub freq: Option<String>,
    pub ncycles: Option<usize>,
    pub round: Option<String>,

    /// Independent cycles: no implicit ordering between consecutive cycles.
    #[serde(default)]
    pub indep: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnsembleSection {
    pub size: u32,

    #[serde(default = "default_first_id")]
    pub first_id: u32,

    #[serde(default)]
    pub iters: BTreeMap<String, Vec<String>>,
}

fn default_first_id() -> u32 {
    1
}

/// `[run]` section: polling and host-communication knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default)]
    pub stop_on_error: bool,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,

    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay: String,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: String,

    #[serde(default = "default_host_timeout")]
    pub host_timeout: String,

    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: String,
}

fn default_poll_interval() -> String {
    "10s".to_string()
}

fn default_retry_attempts() -> usize {
    5
}

fn default_retry_initial_delay() -> String {
    "500ms".to_string()
}

fn default_retry_max_delay() -> String {
    "30s".to_string()
}

fn default_host_timeout() -> String {
    "60s".to_string()
}

fn default_lock_timeout() -> String {
    "30s".to_string()
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            stop_on_error: false,
            retry_attempts: default_retry_attempts(),
            retry_initial_delay: default_retry_initial_delay(),
            retry_max_delay: default_retry_max_delay(),
            host_timeout: default_host_timeout(),
            lock_timeout: default_lock_timeout(),
        }
    }
}

/// Parsed `[run]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub poll_interval: Duration,
    pub stop_on_error: bool,
    pub retry_attempts: usize,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub host_timeout: Duration,
    pub lock_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            stop_on_error: false,
            retry_attempts: 5,
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            host_timeout: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(30),
        }
    }
}

/// Validated workflow configuration, with the iteration spaces generated.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub app: AppId,
    /// `None` when the workflow has no `[cycles]` section.
    pub cycles: Option<CycleSeq>,
    pub indep_cycles: bool,
    /// `None` when the workflow has no `[ensemble]` section.
    pub members: Option<Vec<Member>>,
    pub params: BTreeMap<String, String>,
    pub env_vars: BTreeMap<String, String>,
    pub run: RunOptions,
}

// ---------------------------------------------------------------------------
// tasks.toml
// ---------------------------------------------------------------------------

/// `tasks.toml` as read from disk.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTasksConfig {
    #[serde(default)]
    pub task: BTreeMap<String, RawTaskConfig>,
}

/// `[task.<name>]` section. Every field is optional so that `inherit` can
/// fill the gaps from a parent task.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTaskConfig {
    pub commandline: Option<String>,
    pub inherit: Option<String>,
    pub cycles: Option<bool>,
    pub members: Option<bool>,
    pub after: Option<Vec<DependencySpec>>,
    pub env: Option<String>,
    pub host: Option<String>,
    pub run_dir: Option<String>,
    pub artifacts: Option<BTreeMap<String, String>>,
    pub submit: Option<SubmitOptions>,
}

/// `after = ["A", { task = "B", cycle_offset = -1 }]`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DependencySpec {
    Name(String),
    Detailed {
        task: String,
        #[serde(default)]
        cycle_offset: i64,
    },
}

impl From<DependencySpec> for Dependency {
    fn from(spec: DependencySpec) -> Self {
        match spec {
            DependencySpec::Name(task) => Dependency {
                task,
                cycle_offset: 0,
            },
            DependencySpec::Detailed { task, cycle_offset } => {
                Dependency { task, cycle_offset }
            }
        }
    }
}

/// A resolved dependency on another task, relative to the dependent's cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub task: String,
    pub cycle_offset: i64,
}

/// Scheduler submission options; mapped per scheduler to its own flags.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Generic queue name, translated through the host's `queues` table.
    pub queue: Option<String>,
    /// Wall time, e.g. `"02:00:00"`.
    pub time: Option<String>,
    pub memory: Option<String>,
    pub mail: Option<String>,
    #[serde(default)]
    pub extra: Vec<String>,
}

/// Validated task, inheritance resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    pub name: String,
    pub commandline: String,
    /// Expanded over cycles (when the workflow has cycles).
    pub cycles: bool,
    /// Expanded over ensemble members (when the workflow has an ensemble).
    pub members: bool,
    pub after: Vec<Dependency>,
    /// Name of a host environment (`[host.<h>.envs.<env>]`).
    pub env: Option<String>,
    /// Host override; the workflow host otherwise.
    pub host: Option<String>,
    pub run_dir: Option<String>,
    pub artifacts: BTreeMap<String, String>,
    pub submit: SubmitOptions,
}

/// Validated tasks: unique names, known dependencies, acyclic.
#[derive(Debug, Clone)]
pub struct TasksConfig {
    tasks: BTreeMap<String, TaskConfig>,
}

impl TasksConfig {
    pub(crate) fn new_unchecked(tasks: BTreeMap<String, TaskConfig>) -> Self {
        Self { tasks }
    }

    pub fn get(&self, name: &str) -> Option<&TaskConfig> {
        self.tasks.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TaskConfig)> {
        self.tasks.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// hosts.toml
// ---------------------------------------------------------------------------

/// `hosts.toml` as read from disk.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHostsConfig {
    #[serde(default)]
    pub host: BTreeMap<String, HostConfig>,
}

/// `[host.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub scheduler: SchedulerKind,

    /// Hostname globs used to infer this host.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Maximum number of jobs simultaneously submitted to this host.
    pub max_jobs: Option<usize>,

    /// Shell code run before any `module` command.
    pub module_setup: Option<String>,

    /// Shell code run before `conda activate`.
    pub conda_setup: Option<String>,

    /// Named directories (`~` and `$VAR` are expanded).
    #[serde(default)]
    pub dirs: BTreeMap<String, String>,

    /// Generic queue name -> real queue name.
    #[serde(default)]
    pub queues: BTreeMap<String, String>,

    #[serde(default)]
    pub envs: BTreeMap<String, EnvConfig>,
}

impl HostConfig {
    pub fn queue(&self, generic: &str) -> String {
        self.queues
            .get(generic)
            .cloned()
            .unwrap_or_else(|| generic.to_string())
    }
}

/// `[host.<name>.envs.<env>]` section.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub raw_init: Option<String>,

    #[serde(default)]
    pub modules: ModulesConfig,

    #[serde(default)]
    pub venv: VenvMode,

    #[serde(default)]
    pub vars: VarsConfig,

    pub conda_activate: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct ModulesConfig {
    #[serde(default, rename = "use")]
    pub use_: Vec<String>,
    #[serde(default)]
    pub load: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct VarsConfig {
    /// Names of variables copied from the submitting process.
    #[serde(default)]
    pub forward: Vec<String>,
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    #[serde(default)]
    pub prepend: BTreeMap<String, String>,
    #[serde(default)]
    pub append: BTreeMap<String, String>,
}

/// Validated hosts; always contains the built-in `local` host.
#[derive(Debug, Clone)]
pub struct HostsConfig {
    hosts: BTreeMap<String, HostConfig>,
}

pub const LOCAL_HOST: &str = "local";

impl HostsConfig {
    pub(crate) fn new_unchecked(hosts: BTreeMap<String, HostConfig>) -> Self {
        Self { hosts }
    }

    pub fn get(&self, name: &str) -> Option<&HostConfig> {
        self.hosts.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostConfig)> {
        self.hosts.iter()
    }
}

impl Default for HostsConfig {
    fn default() -> Self {
        let mut hosts = BTreeMap::new();
        hosts.insert(LOCAL_HOST.to_string(), HostConfig::default());
        Self { hosts }
    }
}

// ---------------------------------------------------------------------------
// Everything together
// ---------------------------------------------------------------------------

/// Command-line overrides applied to `workflow.toml` before validation.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub app_name: Option<String>,
    pub app_conf: Option<String>,
    pub app_exp: Option<String>,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub freq: Option<String>,
    pub ncycles: Option<usize>,
}

/// All three configuration files, validated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the workflow; root of `jobs/`, `log/` and `.woom/`.
    pub workflow_dir: PathBuf,
    pub workflow: WorkflowConfig,
    pub tasks: TasksConfig,
    pub hosts: HostsConfig,
}
