//! Error types for cache operations.

/// Error types for cache operations.
///
/// A missing entry is not an error: lookups return `Ok(None)` or an empty list.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store rejected or failed a command.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// The backing store could not be reached.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache configuration cannot be used.
    #[error("invalid cache configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_timeout() || err.is_io_error() {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
