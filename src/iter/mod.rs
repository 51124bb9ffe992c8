// src/iter/mod.rs

//! Iteration spaces of a workflow: time cycles and ensemble members.

pub mod cycle;
pub mod member;

pub use cycle::{
    format_duration, gen_cycles, parse_date, parse_duration, round_date, Cycle, CycleSeq,
    CycleSpec, Freq,
};
pub use member::{gen_ensemble, Member};
