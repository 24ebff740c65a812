//! Engine error kinds.

use poiesis_db::DbError;

/// The pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Tif,
    Texam,
    Tof,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tif => "TIF",
            Self::Texam => "TExAM",
            Self::Tof => "TOF",
        };
        f.write_str(s)
    }
}

/// Errors raised by the engine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed task, invalid UUID, or invalid state transition.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing, invalid, or expired credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Task absent, or present but owned by another user.
    #[error("not found: {0}")]
    NotFound(String),

    /// Document-store failure.
    #[error(transparent)]
    Storage(#[from] DbError),

    /// Unexpected orchestrator API failure (NotFound on delete is
    /// swallowed before this is raised).
    #[error("platform error: {0}")]
    Platform(String),

    /// Filer strategy failure: missing source, refused connection,
    /// permission denied.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Missing required configuration, e.g. object-store credentials
    /// unset while an s3:// URL is in play.
    #[error("configuration error: {0}")]
    Config(String),

    /// A watch ended before a terminal event was observed.
    #[error("monitoring timed out after {0} seconds")]
    MonitorTimeout(u64),

    /// A pod stuck in a critical waiting reason that the platform would
    /// keep retrying.
    #[error("container cannot start: {0}")]
    FatalContainerStart(String),

    /// Broker publish/subscribe failure, including disconnects mid-wait.
    #[error("broker error: {0}")]
    Broker(String),

    /// A pipeline stage reported ERROR on the task channel.
    #[error("{stage} stage failed: {message}")]
    StageFailed { stage: Stage, message: String },
}

impl CoreError {
    /// Whether the failure is an executor-level failure rather than an
    /// infrastructure one. Executor failures are not retried: re-running
    /// a deterministic executor cannot change its outcome.
    pub fn is_executor_failure(&self) -> bool {
        matches!(
            self,
            CoreError::StageFailed {
                stage: Stage::Texam,
                ..
            }
        )
    }
}
