//! Shared helpers for woom's integration tests: config builders, a
//! recording [`fake_host::FakeHost`] and a few setup shortcuts.

pub mod builders;
pub mod fake_host;

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};
use woom::config::Config;
use woom::engine::Workflow;
use woom::host::{Host, HostRegistry};
use woom::store::JobStore;

static INIT: Once = Once::new();

/// Route woom's logs to the test writer, once per test binary.
///
/// Captured output only shows for failing tests; `WOOM_LOG=debug` raises
/// the level.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("WOOM_LOG")
            .unwrap_or_else(|_| EnvFilter::new("woom=info,warn"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Workflow whose `local` host is replaced by `host`.
pub fn workflow_on(
    config: Config,
    host: Arc<dyn Host>,
    store: Arc<dyn JobStore>,
) -> woom::errors::Result<Workflow> {
    init_tracing();
    let hosts = HostRegistry::from_config(config.hosts.clone()).with_host(host);
    Workflow::new(config, hosts, store)?.with_host_name("local")
}

/// Fail the test if `f` takes longer than `secs` seconds.
pub async fn within<F, T>(secs: u64, f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(Duration::from_secs(secs), f).await {
        Ok(value) => value,
        Err(_) => panic!("test timed out after {secs}s"),
    }
}
