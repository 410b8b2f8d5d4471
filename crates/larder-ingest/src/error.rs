//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion and commit.
#[derive(Error, Debug)]
pub enum Error {
    /// A recipe with this name already exists, remotely or in the buffer.
    /// User-facing: the caller must choose a new name.
    #[error("recipe name already exists: {name}")]
    DuplicateName {
        /// The rejected name.
        name: String,
    },

    /// Local storage write did not complete; the submission was NOT
    /// acknowledged and must be reported as failed to the caller.
    #[error("buffer write failure: {0}")]
    WriteFailure(#[source] std::io::Error),

    /// The remote store could not be reached or timed out. Transient;
    /// retried internally by the scheduler and the snapshot refresh.
    #[error("remote store unavailable: {0}")]
    StoreUnavailable(String),

    /// The remote store refused a batch for a structural reason.
    /// Segments are retained for inspection; requires operator attention.
    #[error("remote store rejected commit: {0}")]
    CommitRejected(String),

    /// Recipe field validation failed.
    #[error("invalid recipe: {0}")]
    InvalidRecipe(#[from] larder_core::Error),

    /// I/O error outside the append path (recovery, deletion).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is a transient remote fault worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_display() {
        let err = Error::DuplicateName {
            name: "Pasta".to_string(),
        };
        assert!(err.to_string().contains("Pasta"));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_write_failure_display() {
        let io = std::io::Error::other("disk full");
        let err = Error::WriteFailure(io);
        assert!(err.to_string().contains("buffer write failure"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::StoreUnavailable("timeout".to_string()).is_transient());
        assert!(!Error::CommitRejected("duplicate".to_string()).is_transient());
        assert!(!Error::DuplicateName {
            name: "x".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_from_core_error() {
        let core = larder_core::Error::InvalidField {
            field: "name",
            reason: "empty".to_string(),
        };
        let err: Error = core.into();
        assert!(matches!(err, Error::InvalidRecipe(_)));
    }
}
