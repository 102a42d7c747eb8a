use thiserror::Error;

/// Result type for staging operations
pub type StagingResult<T> = Result<T, StagingError>;

/// Errors that can occur while staging, committing or cleaning up uploads
#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Not found: {id}")]
    NotFound { id: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Upload rejected: {message}")]
    Validation { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StagingError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a validation error (constraint violated before any transfer)
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a transport error
    pub fn transport<S: Into<String>>(reason: S) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// True for failures of the remote side (transport or backend), which a
    /// caller may retry.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Backend { .. })
    }
}
