// src/render/mod.rs

//! Turning a job into a bash script.
//!
//! - [`template`]: the `{{ var | filter }}` renderer and its filter registry.
//! - [`context`]: per-job variables, also exported as `WOOM_*`.
//! - [`env`]: the environment block of a task.
//! - [`script`]: the full `job.sh`.

pub mod context;
pub mod env;
pub mod script;
pub mod template;

pub use context::{JobContext, ENV_PREFIX};
pub use env::{env_block, process_env, EnvLookup};
pub use script::{write_script, JobLocations, RenderedJob, ScriptBuilder};
pub use template::{Context, FilterFn, FilterRegistry, TemplateRenderer};
