use poiesis_models::names::ExecutorNameError;

/// Errors surfaced by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The task does not exist (or is not visible to the caller).
    #[error("task {0} not found")]
    NotFound(String),

    /// A pagination token that is not an insertion-order identifier.
    #[error("invalid page token: {0:?}")]
    InvalidPageToken(String),

    /// An executor-log write addressed by a name that is not
    /// `te-<uuid>-<int>`.
    #[error(transparent)]
    InvalidExecutorName(#[from] ExecutorNameError),

    /// A task document whose log structure does not match the write
    /// (missing attempt, executor index out of range).
    #[error("task {task_id} has no log slot for executor {index}")]
    MissingLogSlot { task_id: String, index: usize },

    /// Document-store read/write failure.
    #[error("storage error: {0}")]
    Storage(#[from] mongodb::error::Error),

    /// Document (de)serialization failure.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] mongodb::bson::ser::Error),
}
