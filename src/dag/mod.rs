// src/dag/mod.rs

//! Task dependency graph and job expansion.
//!
//! - [`graph`]: adjacency between tasks and their topological order.
//! - [`expand`]: tasks × cycles × members → [`JobKey`]s, and job-level
//!   dependency resolution across the cycle and member axes.

pub mod expand;
pub mod graph;

pub use expand::{expand, is_cycling, is_ensemble, job_at, job_dependencies, JobInstance, JobKey};
pub use graph::TaskGraph;
