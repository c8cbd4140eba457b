use std::time::Duration;

use thiserror::Error;

use crate::dispatch::TaskId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Task {id} timed out after {timeout:?}")]
    TaskTimeout { id: TaskId, timeout: Duration },

    #[error("Task {id} discarded: queue cleared")]
    QueueCleared { id: TaskId },

    #[error("Task {id} is already queued or running")]
    DuplicateTask { id: TaskId },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process exited with code {code}: {stderr}")]
    TransportExit { code: i32, stderr: String },

    #[error("Transport timed out after {timeout:?}")]
    TransportTimeout { timeout: Duration },

    #[error("HTTP request failed with status {status}: {body}")]
    TransportStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("No provider available for capability '{capability}'")]
    NoProviderAvailable { capability: String },

    #[error(
        "All providers failed for capability '{capability}': {}",
        format_failures(.failures)
    )]
    AllProvidersFailed {
        capability: String,
        failures: Vec<ProviderFailure>,
    },
}

/// One entry in the fallback trail of [`Error::AllProvidersFailed`].
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: Error,
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("[{}] {}", f.provider, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// True for errors raised by a transport deadline or a queue timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::TaskTimeout { .. } | Error::TransportTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
