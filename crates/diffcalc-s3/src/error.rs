//! Error types for the S3-backed image store.

use thiserror::Error;

/// Errors this adapter can produce before converting into [`diffcalc_core::Error`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The object doesn't exist under the configured bucket/prefix.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The get-object call itself failed for a reason other than a missing key.
    #[error("s3 operation error: {0}")]
    Operation(String),
}

/// Result type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Converts an adapter-local error into the shared core error type, shaped
/// as an `ImageFetch` failure (§7) so the coordinator records it against the
/// failing digest rather than treating it as fatal.
pub fn into_image_fetch_error(digest: diffcalc_core::Digest, err: Error) -> diffcalc_core::Error {
    diffcalc_core::Error::ImageFetch { digest: digest.to_hex(), reason: err.to_string() }
}
