use std::time::Duration;
use thiserror::Error;

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Host-process errors
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{program} did not finish within {}s", limit.as_secs())]
    Timeout {
        program: String,
        limit: Duration,
        partial_output: String,
    },

    #[error("{program} exited with {}", code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutorError::Timeout { .. })
    }

    /// Whatever the tool printed before failing.
    pub fn output(&self) -> &str {
        match self {
            ExecutorError::Timeout { partial_output, .. } => partial_output,
            ExecutorError::NonZeroExit { output, .. } => output,
            ExecutorError::Spawn { .. } | ExecutorError::Io(_) => "",
        }
    }
}
