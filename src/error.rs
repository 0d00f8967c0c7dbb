//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the engine returns one of these variants.
//! The kinds mirror the error taxonomy of the storage-and-query design:
//! configuration, connectivity, schema, validation, SPARQL, integrity,
//! conflict, and internal. `Conflict` is the only class the engine ever
//! retries automatically, and only up to [`CONFLICT_RETRY_LIMIT`].

use thiserror::Error;

/// How many times the engine will automatically retry a `Conflict`-class
/// error (serialization failure, deadlock) before giving up.
pub const CONFLICT_RETRY_LIMIT: u32 = 3;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("sparql error: {0}")]
    Sparql(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("conflict (retryable={retryable}): {message}")]
    Conflict { message: String, retryable: bool },

    #[error("internal error [{id}]: {message}")]
    Internal { id: String, message: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        EngineError::Schema(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn sparql(msg: impl Into<String>) -> Self {
        EngineError::Sparql(msg.into())
    }

    pub fn unsupported_construct(node: impl std::fmt::Display) -> Self {
        EngineError::Sparql(format!("unsupported construct: {node}"))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let message = msg.into();
        tracing::error!(error_id = %id, %message, "internal invariant violated");
        EngineError::Internal { id, message }
    }

    /// Classifies a raw `sqlx::Error` as a `Conflict`, keeping the
    /// retryable flag set only for Postgres SQLSTATE `40001`
    /// (serialization_failure) and `40P01` (deadlock_detected).
    pub fn from_db_conflict(err: sqlx::Error) -> Self {
        let retryable = match &err {
            sqlx::Error::Database(db_err) => matches!(
                db_err.code().as_deref(),
                Some("40001") | Some("40P01")
            ),
            _ => false,
        };
        EngineError::Conflict {
            message: err.to_string(),
            retryable,
        }
    }

    /// `true` for errors the caller may safely retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_carry_an_opaque_id() {
        let err = EngineError::internal("invariant violated");
        match err {
            EngineError::Internal { id, .. } => assert!(!id.is_empty()),
            _ => panic!("expected Internal variant"),
        }
    }

    #[test]
    fn only_conflict_is_ever_retryable() {
        assert!(EngineError::Conflict { message: "x".into(), retryable: true }.is_retryable());
        assert!(!EngineError::Conflict { message: "x".into(), retryable: false }.is_retryable());
        assert!(!EngineError::validation("bad term").is_retryable());
    }
}
