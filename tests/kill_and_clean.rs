// tests/kill_and_clean.rs

mod common;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use common::{records, status_of, workflow};
use tempfile::tempdir;
use woom::engine::{CleanScope, Workflow};
use woom::paths::JobPaths;
use woom::store::{JobFilter, JobRecord, JobStatus, JobStore, MemoryJobStore};
use woom_test_utils::builders::{ConfigBuilder, TaskBuilder};
use woom_test_utils::fake_host::{FakeHost, HostCall};

/// Store a record for the first job of `task`.
fn seed(wf: &Workflow, task: &str, status: JobStatus, id: Option<&str>) -> JobRecord {
    seed_nth(wf, task, 0, status, id)
}

fn seed_nth(
    wf: &Workflow,
    task: &str,
    nth: usize,
    status: JobStatus,
    id: Option<&str>,
) -> JobRecord {
    let job = wf
        .jobs()
        .into_iter()
        .filter(|j| j.key().task == task)
        .nth(nth)
        .expect("task has that many jobs");
    let paths = wf.job_paths(&job.instance);
    fs::create_dir_all(&paths.submission_dir).unwrap();
    let record = JobRecord {
        key: job.key().clone(),
        cycle_label: None,
        external_id: id.map(str::to_string),
        status,
        exit_code: None,
        host: job.host.clone(),
        submission_dir: paths.submission_dir,
        run_dir: None,
        log_dir: paths.log_dir,
        submitted_at: id.map(|_| Utc::now()),
        updated_at: Utc::now(),
        poll_failures: 0,
    };
    wf.store().upsert(record.clone()).unwrap();
    record
}

fn two_tasks(dir: &std::path::Path) -> woom::config::Config {
    ConfigBuilder::new(dir)
        .task("A", TaskBuilder::new("sleep 100").build())
        .task("B", TaskBuilder::new("echo B").build())
        .build()
}

#[tokio::test]
async fn kill_by_task_only_touches_live_jobs_of_that_task() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(two_tasks(dir.path()), host.clone(), store.clone());
    seed(&wf, "A", JobStatus::Running, Some("local-7"));
    seed(&wf, "B", JobStatus::Succeeded, Some("local-8"));

    let killed = wf.kill(&JobFilter::all().task("A")).await.unwrap();

    assert_eq!(killed.len(), 1);
    assert_eq!(host.killed(), vec!["local-7"]);
    assert_eq!(status_of(store.as_ref(), "A"), vec![JobStatus::Killed]);
    assert_eq!(status_of(store.as_ref(), "B"), vec![JobStatus::Succeeded]);
}

#[tokio::test]
async fn kill_by_task_spares_its_succeeded_cycle() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .daily_cycles("2024-01-01", "2024-01-03")
        .task("download_data", TaskBuilder::new("fetch").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());
    let running = seed_nth(&wf, "download_data", 0, JobStatus::Running, Some("local-1"));
    let done = seed_nth(&wf, "download_data", 1, JobStatus::Succeeded, Some("local-2"));

    let killed = wf
        .kill(&JobFilter::all().task("download_data"))
        .await
        .unwrap();

    assert_eq!(killed.len(), 1);
    assert_eq!(killed[0].key, running.key);
    assert_eq!(host.killed(), vec!["local-1"]);
    let after = store.get(&JobFilter::key(&done.key)).unwrap();
    assert_eq!(after[0].status, JobStatus::Succeeded);
    assert_eq!(after[0].updated_at, done.updated_at);
}

#[tokio::test]
async fn kill_skips_terminal_jobs() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(two_tasks(dir.path()), host.clone(), store.clone());
    seed(&wf, "A", JobStatus::Failed, Some("local-1"));
    seed(&wf, "B", JobStatus::Succeeded, Some("local-2"));

    let killed = wf.kill(&JobFilter::all()).await.unwrap();

    assert!(killed.is_empty());
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn kill_by_external_id() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(two_tasks(dir.path()), host.clone(), store.clone());
    seed(&wf, "A", JobStatus::Submitted, Some("local-1"));
    seed(&wf, "B", JobStatus::Running, Some("local-2"));

    wf.kill(&JobFilter::all().external_id("local-2"))
        .await
        .unwrap();

    assert_eq!(host.killed(), vec!["local-2"]);
    assert_eq!(status_of(store.as_ref(), "A"), vec![JobStatus::Submitted]);
}

#[tokio::test]
async fn clean_kills_before_removing_files_then_forgets_jobs() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let seen_dir = Arc::new(AtomicBool::new(false));
    let config = two_tasks(dir.path());
    let submission_dir =
        JobPaths::new(dir.path(), &config.workflow.app, None, "A", None).submission_dir;

    let flag = seen_dir.clone();
    let watched = submission_dir.clone();
    let host = FakeHost::new("local")
        .on_kill(move |_| flag.store(watched.is_dir(), Ordering::SeqCst))
        .into_arc();
    let wf = workflow(config, host.clone(), store.clone());
    seed(&wf, "A", JobStatus::Running, Some("local-1"));

    let report = wf
        .clean(&JobFilter::all(), &CleanScope::default())
        .await
        .unwrap();

    assert!(seen_dir.load(Ordering::SeqCst));
    assert_eq!(report.killed.len(), 1);
    assert!(report.removed.contains(&submission_dir));
    assert!(!submission_dir.exists());
    assert_eq!(report.deleted, 1);
    assert!(records(store.as_ref()).is_empty());
}

#[tokio::test]
async fn clean_dry_run_changes_nothing() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(two_tasks(dir.path()), host.clone(), store.clone());
    let a = seed(&wf, "A", JobStatus::Running, Some("local-1"));
    let writes = store.write_count();

    let scope = CleanScope {
        dry_run: true,
        ..CleanScope::default()
    };
    let report = wf.clean(&JobFilter::all(), &scope).await.unwrap();

    assert_eq!(report.killed.len(), 1);
    assert_eq!(report.removed, vec![a.submission_dir.clone()]);
    assert!(a.submission_dir.is_dir());
    assert!(host.calls().is_empty());
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn clean_removes_artifacts_and_patterns_on_request() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task(
            "A",
            TaskBuilder::new("make out.nc")
                .run_dir("run/{{ task_name }}")
                .artifact("output", "out.nc")
                .build(),
        )
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let mut a = seed(&wf, "A", JobStatus::Succeeded, Some("local-1"));
    let run_dir = dir.path().join("run/A");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("out.nc"), "data").unwrap();
    a.run_dir = Some(run_dir.clone());
    store.upsert(a).unwrap();

    fs::create_dir_all(dir.path().join("scratch")).unwrap();
    fs::write(dir.path().join("scratch/x.tmp"), "").unwrap();
    fs::write(dir.path().join("scratch/keep.txt"), "").unwrap();

    let artifacts_only = CleanScope {
        submission_dirs: false,
        artifacts: true,
        patterns: vec!["scratch/*.tmp".to_string()],
        ..CleanScope::default()
    };
    let report = wf
        .clean(&JobFilter::all(), &artifacts_only)
        .await
        .unwrap();

    assert!(!run_dir.join("out.nc").exists());
    assert!(run_dir.is_dir());
    assert!(!dir.path().join("scratch/x.tmp").exists());
    assert!(dir.path().join("scratch/keep.txt").exists());
    assert_eq!(report.removed.len(), 2);
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn status_refresh_reads_the_exit_status() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(two_tasks(dir.path()), host.clone(), store.clone());
    let a = seed(&wf, "A", JobStatus::Running, Some("local-1"));
    fs::write(a.submission_dir.join("job.status"), "2\n").unwrap();

    let cached = wf.status(&JobFilter::all(), false).await.unwrap();
    assert_eq!(cached[0].status, JobStatus::Running);

    let fresh = wf.status(&JobFilter::all(), true).await.unwrap();
    assert_eq!(fresh[0].status, JobStatus::Failed);
    assert_eq!(fresh[0].exit_code, Some(2));
    assert_eq!(status_of(store.as_ref(), "A"), vec![JobStatus::Failed]);
    assert!(!host.calls().iter().any(|c| matches!(c, HostCall::Poll(_))));
}

#[tokio::test]
async fn job_gone_without_status_is_failed() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(two_tasks(dir.path()), host.clone(), store.clone());
    seed(&wf, "A", JobStatus::Submitted, Some("local-42"));

    let fresh = wf.status(&JobFilter::all(), true).await.unwrap();

    assert_eq!(fresh[0].status, JobStatus::Failed);
    assert_eq!(host.calls(), vec![HostCall::Poll("local-42".to_string())]);
}
