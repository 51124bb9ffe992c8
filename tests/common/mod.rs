#![allow(dead_code)]

use std::sync::Arc;

use woom::config::Config;
use woom::engine::Workflow;
use woom::host::Host;
use woom::store::{JobFilter, JobRecord, JobStatus, JobStore, MemoryJobStore};
use woom_test_utils::workflow_on;

/// Workflow bound to `host` (registered as `local`) and an in-memory store.
pub fn workflow(config: Config, host: Arc<dyn Host>, store: Arc<MemoryJobStore>) -> Workflow {
    workflow_on(config, host, store).expect("workflow should bind to the fake host")
}

pub fn status_of(store: &dyn JobStore, task: &str) -> Vec<JobStatus> {
    store
        .get(&JobFilter::all().task(task))
        .expect("store read")
        .into_iter()
        .map(|r| r.status)
        .collect()
}

pub fn records(store: &dyn JobStore) -> Vec<JobRecord> {
    store.get(&JobFilter::all()).expect("store read")
}
