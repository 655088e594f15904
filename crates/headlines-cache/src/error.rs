//! Error types for the cache layer.

use headlines_storage::StorageError;

/// Failures of the shared key-value store.
///
/// Every variant means "the cache could not help"; callers degrade to the
/// system of record rather than failing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KvError {
    /// The store could not be reached (pool exhausted, connection refused).
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error.
    #[error("key-value command failed: {0}")]
    Command(String),
}

impl KvError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command(message.into())
    }
}

/// Errors surfaced by the cache-aside accessor.
///
/// A missing entity is not an error; lookups return `Ok(None)` for it.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The key-value store is unreachable. Reads fall through to the source
    /// and writes become best-effort, so this only ever reaches callers as a
    /// soft warning.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[from] KvError),

    /// The system of record is unreachable and no cached copy could be served.
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[source] StorageError),

    /// The system of record rejected the operation.
    #[error(transparent)]
    Storage(StorageError),

    /// A value could not be encoded for, or decoded from, the cache.
    #[error("serialization failed for `{key}`: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Returns `true` for errors that should fail the enclosing request.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::Storage(_))
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        if err.is_unavailable() {
            Self::SourceUnavailable(err)
        } else {
            Self::Storage(err)
        }
    }
}

pub type KvResult<T> = Result<T, KvError>;

pub type CacheResult<T> = Result<T, CacheError>;
