// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{ConfigOverrides, ConfigPaths, DEFAULT_TASKS_CFG, DEFAULT_WORKFLOW_CFG};
use crate::store::JobFilter;

/// Command-line arguments for `woom`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "woom",
    version,
    about = "Submit and track cycling ensemble workflows on batch schedulers.",
    long_about = None
)]
pub struct CliArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Workflow configuration; its directory is the workflow directory.
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_WORKFLOW_CFG)]
    pub workflow_cfg: PathBuf,

    /// Task configuration.
    ///
    /// Default: `tasks.toml` next to the workflow configuration.
    #[arg(long, global = true, value_name = "PATH")]
    pub tasks_cfg: Option<PathBuf>,

    /// Host configuration.
    ///
    /// Default: `hosts.toml` next to the workflow configuration, if any.
    #[arg(long, global = true, value_name = "PATH")]
    pub hosts_cfg: Option<PathBuf>,

    /// Host to submit to, instead of the one inferred from the hostname.
    #[arg(long, global = true, value_name = "NAME")]
    pub host: Option<String>,

    #[arg(long, global = true, value_name = "NAME")]
    pub app_name: Option<String>,

    #[arg(long, global = true, value_name = "NAME")]
    pub app_conf: Option<String>,

    #[arg(long, global = true, value_name = "NAME")]
    pub app_exp: Option<String>,

    /// First date of the cycles.
    #[arg(long, global = true, value_name = "DATE")]
    pub begin: Option<String>,

    /// Last date of the cycles.
    #[arg(long, global = true, value_name = "DATE")]
    pub end: Option<String>,

    /// Cycle frequency, e.g. `1D` or `6h`.
    #[arg(long, global = true, value_name = "FREQ")]
    pub freq: Option<String>,

    #[arg(long, global = true, value_name = "N")]
    pub ncycles: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WOOM_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

impl GlobalArgs {
    pub fn config_paths(&self) -> ConfigPaths {
        let tasks = self.tasks_cfg.clone().unwrap_or_else(|| {
            self.workflow_cfg
                .parent()
                .map(|p| p.join(DEFAULT_TASKS_CFG))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TASKS_CFG))
        });
        ConfigPaths {
            workflow: self.workflow_cfg.clone(),
            tasks,
            hosts: self.hosts_cfg.clone(),
        }
    }

    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            app_name: self.app_name.clone(),
            app_conf: self.app_conf.clone(),
            app_exp: self.app_exp.clone(),
            begin: self.begin.clone(),
            end: self.end.clone(),
            freq: self.freq.clone(),
            ncycles: self.ncycles,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Submit the jobs of the workflow and follow them to completion.
    Run {
        /// Render and report, but submit and record nothing.
        #[arg(long)]
        dry_run: bool,

        /// Also resubmit jobs that already succeeded.
        #[arg(long)]
        update: bool,
    },

    /// Print information about the workflow.
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },

    /// Kill submitted jobs.
    Kill {
        /// External job ids.
        jobid: Vec<String>,

        #[command(flatten)]
        select: JobSelect,
    },

    /// Kill jobs, remove their files and forget them.
    Clean {
        #[command(flatten)]
        select: JobSelect,

        /// Also remove run directories.
        #[arg(long)]
        with_run_dirs: bool,

        /// Also remove log directories.
        #[arg(long)]
        with_log_files: bool,

        /// Keep submission directories.
        #[arg(long)]
        without_submission_dirs: bool,

        /// Also remove declared artifacts.
        #[arg(long)]
        artifacts: bool,

        /// Only report what would be removed.
        #[arg(long)]
        dry_run: bool,

        /// Extra paths or globs to remove, relative to the workflow directory.
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ShowCommand {
    /// App, tasks, cycles and ensemble.
    Overview,

    /// Recorded jobs.
    Status {
        #[command(flatten)]
        select: JobSelect,

        /// Only submitted or running jobs.
        #[arg(long)]
        running: bool,

        /// Poll live jobs before printing.
        #[arg(long)]
        refresh: bool,
    },

    /// Run directory of each job.
    #[command(name = "run_dirs", alias = "run-dirs")]
    RunDirs,

    /// Declared artifacts of each job and whether they exist.
    Artifacts,
}

/// Job selection shared by `kill`, `clean` and `show status`.
#[derive(Debug, Clone, Default, Args)]
pub struct JobSelect {
    #[arg(long, value_name = "NAME")]
    pub task: Option<String>,

    /// Cycle token or label.
    #[arg(long, value_name = "CYCLE")]
    pub cycle: Option<String>,

    #[arg(long, value_name = "ID")]
    pub member: Option<u32>,
}

impl JobSelect {
    pub fn filter(&self, external_ids: &[String]) -> JobFilter {
        JobFilter {
            task: self.task.clone(),
            cycle: self.cycle.clone(),
            member: self.member,
            external_ids: external_ids.to_vec(),
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
