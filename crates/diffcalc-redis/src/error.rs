//! Error types for the Redis-backed dedup cache.

use thiserror::Error;

/// Errors this adapter can produce before converting into [`diffcalc_core::Error`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Client construction or connection setup failed.
    #[error("redis connection error: {0}")]
    Connection(String),

    /// A command against an established connection failed.
    #[error("redis command error: {0}")]
    Command(String),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Command(err.to_string())
    }
}

/// Result type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts an adapter-local error into the shared core error type. The
/// dedup cache is advisory (§6, §9): callers treat any failure here as
/// "cache unavailable", not as an invocation-ending problem, so this maps
/// uniformly to `Storage`.
impl From<Error> for diffcalc_core::Error {
    fn from(err: Error) -> Self {
        diffcalc_core::Error::Storage(err.to_string())
    }
}
