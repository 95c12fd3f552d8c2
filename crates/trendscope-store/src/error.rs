use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient: the backing store could not be reached. Retried with
    /// backoff; in-memory engine state keeps operating meanwhile.
    #[error("archive store unavailable: {0}")]
    Unavailable(String),

    /// The store and the engine disagree about an invariant (for example a
    /// different trend body under an already stored version). Never retried.
    #[error("archive store contract violation: {0}")]
    ContractViolation(String),

    #[error(transparent)]
    Sqlx(sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    /// Connectivity failures become [`StoreError::Unavailable`]; everything
    /// else is passed through as-is.
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Sqlx(other),
        }
    }
}
