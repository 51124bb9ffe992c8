// src/errors.rs

//! Crate-wide error aliases and helpers.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WoomError {
    /// Bad or missing configuration, cyclic task dependency, invalid
    /// iteration bounds. Always raised before any submission.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A job script or a templated value could not be rendered.
    #[error("Template render error: {0}")]
    TemplateRender(String),

    /// A submit/poll/kill call to a host failed (after retries, if any).
    #[error("Host communication error ({host}): {message}")]
    HostCommunication { host: String, message: String },

    /// The persisted job state could not be read or written.
    #[error("State store error: {0}")]
    Store(String),

    #[error("Timed out waiting for the state store lock: {0}")]
    LockTimeout(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WoomError {
    pub fn config(msg: impl Into<String>) -> Self {
        WoomError::Config(msg.into())
    }

    pub fn host(host: impl Into<String>, message: impl std::fmt::Display) -> Self {
        WoomError::HostCommunication {
            host: host.into(),
            message: message.to_string(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WoomError>;
