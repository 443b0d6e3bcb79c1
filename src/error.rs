//! # Error Handling
//!
//! Error types shared across the ingestion pipeline. Component-specific errors
//! (`FeedError`, `ValidationError`, `TransportError`, ...) live next to the code that
//! raises them and are folded into [`PipelineError`] at the cycle boundary.

use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

use crate::feed::FeedError;

/// Failures raised by repository implementations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The store could not be reached at all (connection refused, pool exhausted).
    #[error("database unavailable: {0}")]
    Unavailable(#[source] DbErr),
    #[error("database error: {0}")]
    Database(#[source] DbErr),
    #[error("invalid {entity} data: {message}")]
    InvalidData {
        entity: &'static str,
        message: String,
    },
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
}

impl RepositoryError {
    /// True when the backing store itself is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }

    pub fn invalid(entity: &'static str, message: impl Into<String>) -> Self {
        RepositoryError::InvalidData {
            entity,
            message: message.into(),
        }
    }
}

impl From<DbErr> for RepositoryError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => RepositoryError::Unavailable(err),
            other => RepositoryError::Database(other),
        }
    }
}

/// Cycle-level failure of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("feed fetch failed: {0}")]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("failed to serialize email job: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("ingestion cycle exceeded the {timeout_secs}s timeout")]
    Timeout { timeout_secs: u64 },
}

impl PipelineError {
    /// Fatal errors abort the whole cycle and leave the watermark where it was.
    /// Everything else is isolated to the disaster being processed.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Feed(_) | PipelineError::Timeout { .. } => true,
            PipelineError::Repository(err) => err.is_unavailable(),
            PipelineError::Serialization(_) => false,
        }
    }
}

/// Detects a unique-constraint violation on Postgres or SQLite.
pub fn is_unique_violation(error: &DbErr) -> bool {
    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .map(|code| code.as_ref() == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_unavailable() {
        let err = RepositoryError::from(DbErr::Conn(RuntimeErr::Internal("refused".into())));
        assert!(err.is_unavailable());

        let err = RepositoryError::from(DbErr::RecordNotFound("x".into()));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn fatal_classification() {
        let unavailable = PipelineError::Repository(RepositoryError::Unavailable(DbErr::Conn(
            RuntimeErr::Internal("down".into()),
        )));
        assert!(unavailable.is_fatal());

        let query_failure = PipelineError::Repository(RepositoryError::Database(DbErr::Custom(
            "bad row".into(),
        )));
        assert!(!query_failure.is_fatal());

        assert!(PipelineError::Timeout { timeout_secs: 5 }.is_fatal());
        assert!(PipelineError::Feed(FeedError::Status { status: 503 }).is_fatal());
    }

    #[test]
    fn non_sqlx_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&DbErr::RecordNotFound("row".into())));
        assert!(!is_unique_violation(&DbErr::Custom("23505".into())));
    }
}
