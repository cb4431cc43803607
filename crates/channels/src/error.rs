use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across transport and delivery code.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// The channel invalidated our credentials. Never retried.
    #[error("logged out: {message}")]
    LoggedOut { message: String },

    /// Operation is currently unavailable (not connected, closed).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// Outbound media exceeds the configured size cap.
    #[error("media {source_ref} is {size} bytes, limit is {limit}")]
    MediaTooLarge {
        source_ref: String,
        size: u64,
        limit: u64,
    },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn logged_out(message: impl std::fmt::Display) -> Self {
        Self::LoggedOut {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether this failure means the credentials are gone for good.
    #[must_use]
    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut { .. })
    }
}
