//! S3-backed [`diffcalc_core::ImageStore`] (§4.2, §6).
//!
//! Objects are keyed by the digest's lowercase hex form directly, no path
//! prefix: the bucket is expected to be dedicated to this content-addressed
//! image corpus.
//!
//! # Example
//!
//! ```rust,ignore
//! use diffcalc_s3::S3ImageStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = S3ImageStore::new("my-diff-corpus").await;
//!     Ok(())
//! }
//! ```

mod error;

pub use error::Error;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use diffcalc_core::{Digest, ImageStore, Result as CoreResult};
use tracing::debug;

/// An `ImageStore` backed by an S3 (or S3-compatible) bucket.
pub struct S3ImageStore {
    client: Client,
    bucket: String,
}

impl S3ImageStore {
    /// Builds a client from the environment's default AWS configuration.
    pub async fn new(bucket: &str) -> Self {
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);
        Self { client, bucket: bucket.to_string() }
    }

    /// Uses a caller-provided client, e.g. one pointed at a local S3-compatible
    /// endpoint for testing.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str) -> Self {
        Self { client, bucket: bucket.to_string() }
    }

    fn object_key(digest: Digest) -> String {
        digest.to_hex()
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn get_image_bytes(&self, digest: Digest) -> CoreResult<Vec<u8>> {
        let key = Self::object_key(digest);
        match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| error::into_image_fetch_error(digest, Error::Operation(e.to_string())))?
                    .into_bytes();
                debug!(digest = %digest, bytes = bytes.len(), "fetched image bytes");
                Ok(bytes.to_vec())
            }
            Err(err) => {
                let msg = err.to_string();
                let mapped = if msg.contains("NoSuchKey") {
                    Error::NotFound(key)
                } else {
                    Error::Operation(msg)
                };
                Err(error::into_image_fetch_error(digest, mapped))
            }
        }
    }
}
