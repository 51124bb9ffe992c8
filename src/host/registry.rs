// src/host/registry.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use globset::Glob;
use tracing::{debug, warn};

use crate::config::{HostConfig, HostsConfig, LOCAL_HOST};
use crate::errors::{Result, WoomError};
use crate::host::{BackgroundHost, Host, PbsProHost, SlurmHost};
use crate::types::SchedulerKind;

/// Hosts declared in `hosts.toml` (plus `local`), with their live
/// [`Host`] implementations.
#[derive(Clone)]
pub struct HostRegistry {
    configs: HostsConfig,
    hosts: BTreeMap<String, Arc<dyn Host>>,
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegistry")
            .field("hosts", &self.hosts.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl HostRegistry {
    pub fn from_config(configs: HostsConfig) -> Self {
        let hosts = configs
            .iter()
            .map(|(name, cfg)| {
                let host: Arc<dyn Host> = match cfg.scheduler {
                    SchedulerKind::Background => Arc::new(BackgroundHost::new(name, cfg.max_jobs)),
                    SchedulerKind::Slurm => Arc::new(SlurmHost::new(name, cfg.max_jobs)),
                    SchedulerKind::PbsPro => Arc::new(PbsProHost::new(name, cfg.max_jobs)),
                };
                (name.clone(), host)
            })
            .collect();
        Self { configs, hosts }
    }

    /// Replace (or add) the implementation registered under `host.name()`.
    pub fn with_host(mut self, host: Arc<dyn Host>) -> Self {
        self.hosts.insert(host.name().to_string(), host);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Host>> {
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| WoomError::config(format!("unknown host '{name}'")))
    }

    /// Declared configuration of a host; hosts added with [`with_host`]
    /// only get defaults.
    ///
    /// [`with_host`]: HostRegistry::with_host
    pub fn config(&self, name: &str) -> HostConfig {
        self.configs.get(name).cloned().unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(|s| s.as_str())
    }

    /// Pick the host matching the current machine, `local` otherwise.
    pub fn infer(&self) -> String {
        match current_hostname() {
            Ok(hostname) => infer_host_name(&self.configs, &hostname),
            Err(e) => {
                warn!(error = %e, "cannot determine hostname; using the local host");
                LOCAL_HOST.to_string()
            }
        }
    }
}

pub fn current_hostname() -> Result<String> {
    whoami::hostname().map_err(|e| WoomError::host(LOCAL_HOST, format!("hostname: {e}")))
}

/// First host (in name order) with a pattern matching `hostname`.
pub fn infer_host_name(configs: &HostsConfig, hostname: &str) -> String {
    for (name, cfg) in configs.iter() {
        for pattern in cfg.patterns.iter() {
            let Ok(glob) = Glob::new(pattern) else {
                continue;
            };
            if glob.compile_matcher().is_match(hostname) {
                debug!(host = %name, %hostname, %pattern, "inferred host");
                return name.clone();
            }
        }
    }
    LOCAL_HOST.to_string()
}
