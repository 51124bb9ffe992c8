// tests/run_workflow.rs

mod common;

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use common::{records, status_of, workflow};
use tempfile::tempdir;
use woom::engine::{show, RunMode};
use woom::store::{JobRecord, JobStatus, JobStore, MemoryJobStore};
use woom_test_utils::builders::{ConfigBuilder, TaskBuilder};
use woom_test_utils::fake_host::{FakeHost, FakeOutcome, HostCall};

fn chain(dir: &std::path::Path) -> ConfigBuilder {
    ConfigBuilder::new(dir)
        .task("A", TaskBuilder::new("echo A").build())
        .task("B", TaskBuilder::new("echo B").after("A").build())
        .task("C", TaskBuilder::new("echo C").after("B").build())
}

fn three_cycles(dir: &std::path::Path) -> ConfigBuilder {
    ConfigBuilder::new(dir)
        .app("manga")
        .daily_cycles("2024-01-01", "2024-01-04")
}

#[tokio::test]
async fn dry_run_submits_nothing_and_writes_nothing() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = three_cycles(dir.path())
        .task("model", TaskBuilder::new("run").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf
        .run(RunMode {
            dry_run: true,
            update: false,
        })
        .await
        .unwrap();

    assert_eq!(report.submitted.len(), 3);
    assert!(report.is_success());
    assert!(host.calls().is_empty());
    assert_eq!(store.write_count(), 0);
    assert!(records(store.as_ref()).is_empty());
    assert!(!dir.path().join("jobs").exists());
}

#[tokio::test]
async fn every_cycle_succeeds_from_its_status_file() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = three_cycles(dir.path())
        .task("model", TaskBuilder::new("run").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(host.submitted(), vec!["model.c0", "model.c1", "model.c2"]);
    assert_eq!(
        status_of(store.as_ref(), "model"),
        vec![JobStatus::Succeeded; 3]
    );
}

#[tokio::test]
async fn failed_dependency_keeps_same_cycle_dependent_pending() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local")
        .with_outcome("A", FakeOutcome::Fail(1))
        .into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = three_cycles(dir.path())
        .independent_cycles(true)
        .task("A", TaskBuilder::new("false").build())
        .task("B", TaskBuilder::new("post").after("A").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert_eq!(report.failed.len(), 3);
    assert_eq!(status_of(store.as_ref(), "B"), vec![JobStatus::Pending; 3]);
    assert!(host.submitted().iter().all(|n| n.starts_with("A.")));
}

#[tokio::test]
async fn chain_runs_in_dependency_order() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(chain(dir.path()).build(), host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(host.submitted(), vec!["A", "B", "C"]);
    for task in ["A", "B", "C"] {
        assert_eq!(status_of(store.as_ref(), task), vec![JobStatus::Succeeded]);
    }
    let a = &store.get(&woom::store::JobFilter::all().task("A")).unwrap()[0];
    assert_eq!(a.exit_code, Some(0));
    assert_eq!(a.external_id.as_deref(), Some("local-1"));
    assert!(a.submission_dir.join("job.sh").is_file());
}

#[tokio::test]
async fn failure_leaves_dependents_pending() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local")
        .with_outcome("A", FakeOutcome::Fail(3))
        .into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task("A", TaskBuilder::new("false").build())
        .task("B", TaskBuilder::new("echo B").after("A").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].task, "A");
    assert_eq!(report.pending.len(), 1);
    assert_eq!(host.submitted(), vec!["A"]);
    assert_eq!(status_of(store.as_ref(), "B"), vec![JobStatus::Pending]);
    let a = &records(store.as_ref())[0];
    assert_eq!((a.status, a.exit_code), (JobStatus::Failed, Some(3)));
}

#[tokio::test]
async fn independent_tasks_keep_running_after_a_failure() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local")
        .with_outcome("A", FakeOutcome::Fail(1))
        .into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task("A", TaskBuilder::new("false").build())
        .task("Z", TaskBuilder::new("echo Z").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    wf.run(RunMode::default()).await.unwrap();

    assert_eq!(status_of(store.as_ref(), "Z"), vec![JobStatus::Succeeded]);
}

#[tokio::test]
async fn stop_on_error_halts_new_submissions() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local")
        .with_outcome("A", FakeOutcome::Fail(1))
        .into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .stop_on_error()
        .task("A", TaskBuilder::new("false").build())
        .task("S", TaskBuilder::new("echo S").build())
        .task("Z", TaskBuilder::new("echo Z").after("S").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    // Z only waits on S, which succeeded, but A failed first.
    assert_eq!(host.submitted(), vec!["A", "S"]);
    assert_eq!(status_of(store.as_ref(), "S"), vec![JobStatus::Succeeded]);
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].task, "Z");
}

#[tokio::test]
async fn rejected_submission_is_submit_failed() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local")
        .with_outcome("A", FakeOutcome::Reject)
        .into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task("A", TaskBuilder::new("echo A").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(!report.is_success());
    // Retried up to the configured number of attempts.
    assert_eq!(host.submitted().len(), 2);
    assert_eq!(status_of(store.as_ref(), "A"), vec![JobStatus::SubmitFailed]);
}

#[tokio::test]
async fn unknown_template_variable_fails_the_submission_only() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task("A", TaskBuilder::new("run {{ no_such_var }}").build())
        .task("Z", TaskBuilder::new("echo Z").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    wf.run(RunMode::default()).await.unwrap();

    assert_eq!(host.submitted(), vec!["Z"]);
    assert_eq!(status_of(store.as_ref(), "A"), vec![JobStatus::SubmitFailed]);
}

#[tokio::test]
async fn unreachable_host_marks_live_jobs_unknown() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local")
        .with_default_outcome(FakeOutcome::Run)
        .unreachable()
        .into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task("A", TaskBuilder::new("sleep 100").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(!report.is_success());
    let a = &records(store.as_ref())[0];
    assert_eq!(a.status, JobStatus::Unknown);
    assert_eq!(a.poll_failures, 1);
    let polls = host
        .calls()
        .into_iter()
        .filter(|c| matches!(c, HostCall::Poll(_)))
        .count();
    assert_eq!(polls, 2);
}

#[tokio::test]
async fn unknown_job_that_finished_is_stored_as_succeeded() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task("A", TaskBuilder::new("sleep 100").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let job = wf.jobs().remove(0);
    let paths = wf.job_paths(&job.instance);
    fs::create_dir_all(&paths.submission_dir).unwrap();
    fs::write(paths.status_path(), "0\n").unwrap();
    store
        .upsert(JobRecord {
            key: job.key().clone(),
            cycle_label: None,
            external_id: Some("local-7".to_string()),
            status: JobStatus::Unknown,
            exit_code: None,
            host: job.host.clone(),
            submission_dir: paths.submission_dir.clone(),
            run_dir: None,
            log_dir: paths.log_dir.clone(),
            submitted_at: Some(Utc::now()),
            updated_at: Utc::now(),
            poll_failures: 3,
        })
        .unwrap();

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.skipped, vec![job.key().clone()]);
    assert!(host.submitted().is_empty());
    let a = &records(store.as_ref())[0];
    assert_eq!((a.status, a.exit_code), (JobStatus::Succeeded, Some(0)));

    // A later run sees the stored status without reading the job again.
    fs::remove_file(paths.status_path()).unwrap();
    let writes = store.write_count();
    wf.run(RunMode::default()).await.unwrap();
    assert_eq!(status_of(store.as_ref(), "A"), vec![JobStatus::Succeeded]);
    assert_eq!(store.write_count(), writes);
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn second_run_skips_succeeded_jobs() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(chain(dir.path()).build(), host.clone(), store.clone());

    wf.run(RunMode::default()).await.unwrap();
    let writes = store.write_count();
    let report = wf.run(RunMode::default()).await.unwrap();

    assert_eq!(report.skipped.len(), 3);
    assert!(report.submitted.is_empty());
    assert_eq!(host.submitted().len(), 3);
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn update_resubmits_every_job_once() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(chain(dir.path()).build(), host.clone(), store.clone());

    wf.run(RunMode::default()).await.unwrap();
    let report = wf
        .run(RunMode {
            dry_run: false,
            update: true,
        })
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.submitted.len(), 3);
    assert_eq!(host.submitted(), vec!["A", "B", "C", "A", "B", "C"]);
}

#[tokio::test]
async fn failed_jobs_are_resubmitted_by_the_next_run() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());
    let config = chain(dir.path()).build();

    let failing = FakeHost::new("local")
        .with_outcome("B", FakeOutcome::Fail(1))
        .into_arc();
    workflow(config.clone(), failing, store.clone())
        .run(RunMode::default())
        .await
        .unwrap();
    assert_eq!(status_of(store.as_ref(), "C"), vec![JobStatus::Pending]);

    let fixed = FakeHost::new("local").into_arc();
    let report = workflow(config, fixed.clone(), store.clone())
        .run(RunMode::default())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(fixed.submitted(), vec!["B", "C"]);
    assert_eq!(report.skipped.len(), 1);
}

#[tokio::test]
async fn cycles_and_members_expand_into_jobs() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .app("manga")
        .daily_cycles("2024-01-01", "2024-01-03")
        .ensemble(2)
        .task("prepro", TaskBuilder::new("prep").members(false).build())
        .task("model", TaskBuilder::new("run").after("prepro").build())
        .task(
            "setup",
            TaskBuilder::new("setup").cycles(false).members(false).build(),
        )
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(report.is_success());
    // setup once, prepro per cycle, model per cycle and member.
    assert_eq!(records(store.as_ref()).len(), 1 + 2 + 4);
    let names = host.submitted();
    assert!(names.contains(&"model.c1.m2".to_string()));
    let first_model = names.iter().position(|n| n == "model.c0.m1").unwrap();
    let first_prepro = names.iter().position(|n| n == "prepro.c0").unwrap();
    assert!(first_prepro < first_model);

    let model = store
        .get(&woom::store::JobFilter::all().task("model").member(2))
        .unwrap();
    assert_eq!(model.len(), 2);
    assert!(model.iter().all(|r| r.cycle_label.is_some()));
}

#[tokio::test]
async fn host_limit_still_completes_the_workflow() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").with_max_jobs(1).into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let config = ConfigBuilder::new(dir.path())
        .task("A", TaskBuilder::new("echo A").build())
        .task("B", TaskBuilder::new("echo B").build())
        .task("C", TaskBuilder::new("echo C").build())
        .build();
    let wf = workflow(config, host.clone(), store.clone());

    let report = wf.run(RunMode::default()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(host.submitted(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn records_persist_across_invocations() {
    let dir = tempdir().unwrap();
    let config = chain(dir.path()).build();
    let lock_timeout = config.workflow.run.lock_timeout;
    let open = || -> Arc<dyn JobStore> {
        Arc::new(woom::store::FileJobStore::new(dir.path(), lock_timeout))
    };

    let first = FakeHost::new("local").into_arc();
    woom_test_utils::workflow_on(config.clone(), first, open())
        .unwrap()
        .run(RunMode::default())
        .await
        .unwrap();

    let second = FakeHost::new("local").into_arc();
    let wf = woom_test_utils::workflow_on(config, second.clone(), open()).unwrap();
    let seen = wf
        .status(&woom::store::JobFilter::all(), false)
        .await
        .unwrap();
    let report = wf.run(RunMode::default()).await.unwrap();

    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|r| r.status == JobStatus::Succeeded));
    assert_eq!(report.skipped.len(), 3);
    assert!(second.calls().is_empty());
}

#[test]
fn overview_lists_tasks_with_their_dependencies() {
    let dir = tempdir().unwrap();
    let host = FakeHost::new("local").into_arc();
    let store = Arc::new(MemoryJobStore::new());
    let wf = workflow(chain(dir.path()).build(), host, store);

    let out = show::overview(&wf);

    assert!(out.starts_with(&format!("workflow dir: {}\n", dir.path().display())));
    assert!(out.contains("\nhost: local\n"));
    assert!(out.ends_with(
        "\ntasks:\n  A\n  B <- A\n  C <- B\n\ncycles: none\n\nensemble: none\n"
    ));
}
