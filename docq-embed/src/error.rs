//! Error types for the embedding boundary.

/// Result type for embedding operations, using [`EmbedError`].
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Errors that can occur while loading an embedding model or generating
/// embeddings.
///
/// Configuration problems (unknown model name, uninitialized provider) are
/// distinguished from runtime failures so callers can treat the former as
/// fatal setup errors and the latter as embedding failures.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The provider configuration is invalid or the provider was used
    /// before initialization.
    #[error("Invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// IO errors while reading model files.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors from blocking model work.
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Errors from the underlying embedding library.
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Convenience constructor for [`EmbedError::InvalidConfig`].
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
