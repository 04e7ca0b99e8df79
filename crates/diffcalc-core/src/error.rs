//! Error taxonomy for the diff-calculation worker.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors the worker can surface: transient storage errors are retried
/// by the caller of the fallible operation, fetch/decode errors are
/// recorded and skipped rather than propagated out of an invocation,
/// and invariant violations are fatal.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The digest byte width didn't match [`crate::digest::DIGEST_LEN`], or
    /// some other internal precondition was violated. Not retried.
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    /// A digest string couldn't be parsed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// The caller passed a grouping or digest set that can't be processed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Fetching image bytes from the blob store failed.
    #[error("image fetch failed for digest {digest}: {reason}")]
    ImageFetch {
        /// Hex digest of the image that failed to fetch.
        digest: String,
        /// Human-readable failure reason, also stored in `ProblemImages`.
        reason: String,
    },

    /// The fetched bytes didn't decode as a PNG.
    #[error("image decode failed for digest {digest}: {reason}")]
    ImageDecode {
        /// Hex digest of the image that failed to decode.
        digest: String,
        /// Human-readable failure reason, also stored in `ProblemImages`.
        reason: String,
    },

    /// A storage backend (diff store, dedup cache) reported a transient
    /// failure; retries were exhausted.
    #[error("storage error: {0}")]
    Storage(String),

    /// The invocation's deadline elapsed, or its cancellation token fired.
    #[error("invocation cancelled or timed out")]
    Cancelled,

    /// Every image in the invocation failed to fetch or decode.
    #[error("all {count} image(s) failed to fetch or decode")]
    AllImagesFailed {
        /// Number of distinct digests that failed.
        count: usize,
    },
}
