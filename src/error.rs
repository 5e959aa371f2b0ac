//! Error types for guide-dispatch

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Transition attempted on a record that is no longer in the expected state
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Errors that mean the store itself is unusable.
    ///
    /// Batch jobs abort on these; everything else is a per-record outcome.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            DispatchError::Database(_) | DispatchError::Io(_) | DispatchError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_classification() {
        assert!(DispatchError::Internal("lock poisoned".into()).is_infrastructure());
        assert!(DispatchError::Database(rusqlite::Error::InvalidQuery).is_infrastructure());
        assert!(!DispatchError::Conflict("stale".into()).is_infrastructure());
        assert!(!DispatchError::NotFound("trip".into()).is_infrastructure());
    }
}
