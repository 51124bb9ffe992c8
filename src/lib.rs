// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod host;
pub mod iter;
pub mod logging;
pub mod paths;
pub mod render;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, ShowCommand};
use crate::config::load_and_validate;
use crate::engine::{show, CleanScope, RunMode, Workflow};
use crate::host::HostRegistry;
use crate::store::FileJobStore;

/// High-level entry point used by `main.rs`.
///
/// Loads the three configuration files, binds them to the host registry and
/// the file store of the workflow directory, then runs the subcommand.
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let paths = args.global.config_paths();
    let config = load_and_validate(&paths, &args.global.overrides())?;
    debug!(workflow_dir = %config.workflow_dir.display(), "configuration loaded");

    let hosts = HostRegistry::from_config(config.hosts.clone());
    let store = Arc::new(FileJobStore::new(
        &config.workflow_dir,
        config.workflow.run.lock_timeout,
    ));
    let mut workflow = Workflow::new(config, hosts, store)?;
    if let Some(host) = args.global.host.as_deref() {
        workflow = workflow.with_host_name(host)?;
    }

    match args.command {
        Command::Run { dry_run, update } => {
            let report = workflow.run(RunMode { dry_run, update }).await?;
            if !report.is_success() {
                for key in report.failed.iter() {
                    eprintln!("failed: {key}");
                }
                return Ok(1);
            }
        }
        Command::Show { what } => match what {
            ShowCommand::Overview => print!("{}", show::overview(&workflow)),
            ShowCommand::Status {
                select,
                running,
                refresh,
            } => {
                let records = workflow.status(&select.filter(&[]), refresh).await?;
                print!("{}", show::status(&records, running));
            }
            ShowCommand::RunDirs => print!("{}", show::run_dirs(&workflow)?),
            ShowCommand::Artifacts => print!("{}", show::artifacts(&workflow)?),
        },
        Command::Kill { jobid, select } => {
            let killed = workflow.kill(&select.filter(&jobid)).await?;
            info!(count = killed.len(), "kill done");
        }
        Command::Clean {
            select,
            with_run_dirs,
            with_log_files,
            without_submission_dirs,
            artifacts,
            dry_run,
            paths,
        } => {
            let scope = CleanScope {
                submission_dirs: !without_submission_dirs,
                run_dirs: with_run_dirs,
                log_dirs: with_log_files,
                artifacts,
                patterns: paths,
                dry_run,
            };
            let report = workflow.clean(&select.filter(&[]), &scope).await?;
            info!(
                killed = report.killed.len(),
                removed = report.removed.len(),
                records = report.deleted,
                "clean done"
            );
        }
    }
    Ok(0)
}

/// Directory of the workflow file, where `log/woom.log` goes.
pub fn workflow_dir_hint(workflow_cfg: &Path) -> PathBuf {
    match workflow_cfg.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
