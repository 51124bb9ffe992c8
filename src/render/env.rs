// src/render/env.rs

//! Environment block of a job script.
//!
//! Lines are emitted in a fixed order, each step able to use what the
//! previous ones set up: raw init, modules, venv, forwarded variables,
//! set/prepend/append, conda.

use tracing::warn;

use crate::config::{EnvConfig, HostConfig};
use crate::types::VenvMode;

/// Looks up a variable of the submitting process.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Lookup backed by the real process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Shell lines setting up `env` on `host`.
pub fn env_block(host: &HostConfig, env: &EnvConfig, lookup: EnvLookup<'_>) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(raw) = env.raw_init.as_deref().filter(|s| !s.trim().is_empty()) {
        lines.push(raw.trim_end().to_string());
    }

    let modules = &env.modules;
    if !modules.use_.is_empty() || !modules.load.is_empty() {
        if let Some(setup) = host.module_setup.as_deref() {
            lines.push(setup.trim_end().to_string());
        }
        for path in modules.use_.iter() {
            lines.push(format!("module use {path}"));
        }
        if !modules.load.is_empty() {
            lines.push(format!("module load {}", modules.load.join(" ")));
        }
    }

    match &env.venv {
        VenvMode::Off => {}
        VenvMode::Auto => {
            if let Some(venv) = lookup("VIRTUAL_ENV") {
                lines.push(format!("source {}", quote_literal(&format!("{venv}/bin/activate"))));
            }
        }
        VenvMode::Path(path) => {
            lines.push(format!("source {}/bin/activate", quote(path.trim_end_matches('/'))));
        }
    }

    for name in env.vars.forward.iter() {
        match lookup(name) {
            Some(value) => lines.push(format!("export {name}={}", quote_literal(&value))),
            None => warn!(var = %name, "cannot forward undefined environment variable"),
        }
    }

    let vars = &env.vars;
    for (name, value) in vars.set.iter() {
        lines.push(format!("export {name}={}", quote(value)));
    }
    for (name, value) in vars.prepend.iter() {
        lines.push(prepend_line(name, value));
    }
    for (name, value) in vars.append.iter() {
        lines.push(format!("export {name}=\"${{{name}:+${name}:}}{}\"", escape(value)));
    }

    if let Some(conda_env) = env.conda_activate.as_deref() {
        if let Some(setup) = host.conda_setup.as_deref() {
            lines.push(setup.trim_end().to_string());
        }
        lines.push(format!("conda activate {}", quote(conda_env)));
    }

    lines
}

/// `export NAME="value${NAME:+:$NAME}"`
pub fn prepend_line(name: &str, value: &str) -> String {
    format!("export {name}=\"{}${{{name}:+:${name}}}\"", escape(value))
}

/// Double-quote `s`, leaving `$` expansions active.
pub fn quote(s: &str) -> String {
    format!("\"{}\"", escape(s))
}

/// Double-quote `s` so that it is taken literally.
pub fn quote_literal(s: &str) -> String {
    format!("\"{}\"", escape(s).replace('$', "\\$"))
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('`', "\\`")
}
