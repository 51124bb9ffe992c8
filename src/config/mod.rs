// src/config/mod.rs

//! Configuration loading and validation for woom.
//!
//! Responsibilities:
//! - Define the TOML-backed data model for `workflow.toml`, `tasks.toml` and
//!   `hosts.toml` (`model.rs`).
//! - Load the files from disk and apply command-line overrides (`loader.rs`).
//! - Validate invariants: iteration bounds, task inheritance, dependency
//!   references and acyclicity (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    apply_overrides, load_and_validate, ConfigPaths, DEFAULT_HOSTS_CFG, DEFAULT_TASKS_CFG,
    DEFAULT_WORKFLOW_CFG,
};
pub use model::{
    Config, ConfigOverrides, Dependency, EnvConfig, HostConfig, HostsConfig, ModulesConfig,
    RawHostsConfig, RawTaskConfig, RawTasksConfig, RawWorkflowConfig, RunOptions, SubmitOptions,
    TaskConfig, TasksConfig, VarsConfig, WorkflowConfig, LOCAL_HOST,
};
