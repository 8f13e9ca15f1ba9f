use thiserror::Error;

use crate::events::PhotoId;

/// Failure of a single fetch or write on the provider pipeline.
///
/// Every variant is scoped to one identifier; none of them stop a worker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The service could not be reached or answered with an error. Retryable.
    #[error("network failure: {0}")]
    Network(String),

    /// The payload could not be stored in the disk cache (disk full, unwritable
    /// directory, payload larger than the budget). The fetch itself succeeded.
    #[error("cache write failure: {0}")]
    CacheWrite(String),

    /// The photo no longer exists on the service.
    #[error("photo {0} not found")]
    NotFound(PhotoId),

    /// The bytes were fetched but are not a decodable image.
    #[error("malformed content: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network(err.to_string())
    }

    pub fn cache_write(err: impl std::fmt::Display) -> Self {
        Self::CacheWrite(err.to_string())
    }

    pub fn malformed(err: impl std::fmt::Display) -> Self {
        Self::Malformed(err.to_string())
    }

    /// Malformed content is retried like a network failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Malformed(_))
    }
}
