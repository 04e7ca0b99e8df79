//! §4.2: fetches and decodes one image, recording unrecoverable failures.

use std::sync::Arc;

use image::{ImageFormat, RgbaImage};
use tracing::warn;

use crate::clock::Clock;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::store::{DiffMetricStore, ImageStore};

/// Fetches PNG bytes for a digest and decodes them into a normalized RGBA8
/// image, recording a [`crate::model::ProblemImage`] row on any failure.
///
/// Caches nothing persistently; per-invocation caching is the coordinator's
/// concern (§4.5 step 3).
pub struct Fetcher<I: ?Sized, D: ?Sized, C: ?Sized> {
    images: Arc<I>,
    diff_store: Arc<D>,
    clock: Arc<C>,
}

impl<I: ?Sized, D: ?Sized, C: ?Sized> Clone for Fetcher<I, D, C> {
    fn clone(&self) -> Self {
        Self { images: self.images.clone(), diff_store: self.diff_store.clone(), clock: self.clock.clone() }
    }
}

impl<I, D, C> Fetcher<I, D, C>
where
    I: ImageStore + ?Sized,
    D: DiffMetricStore + ?Sized,
    C: Clock + ?Sized,
{
    /// Builds a fetcher over the given blob store, persistence gateway (for
    /// problem-image bookkeeping), and clock.
    pub fn new(images: Arc<I>, diff_store: Arc<D>, clock: Arc<C>) -> Self {
        Self { images, diff_store, clock }
    }

    /// Fetches and decodes the image for `digest`. On failure, upserts a
    /// `ProblemImages` row before returning the error (§4.2).
    pub async fn get_image(&self, digest: Digest) -> Result<RgbaImage> {
        match self.try_get_image(digest).await {
            Ok(img) => Ok(img),
            Err(err) => {
                let message = err.to_string();
                warn!(digest = %digest, error = %message, "image fetch/decode failed");
                if let Err(store_err) = self
                    .diff_store
                    .upsert_problem_image(digest, &message, self.clock.now())
                    .await
                {
                    warn!(digest = %digest, error = %store_err, "failed to record problem image");
                }
                Err(err)
            }
        }
    }

    async fn try_get_image(&self, digest: Digest) -> Result<RgbaImage> {
        let bytes = self.images.get_image_bytes(digest).await.map_err(|e| Error::ImageFetch {
            digest: digest.to_hex(),
            reason: e.to_string(),
        })?;
        decode_png(&bytes).map_err(|reason| Error::ImageDecode { digest: digest.to_hex(), reason })
    }
}

/// Decodes `bytes` as a PNG and normalizes the result to non-premultiplied
/// 8-bit RGBA (§4.1's precondition on comparator inputs).
fn decode_png(bytes: &[u8]) -> std::result::Result<RgbaImage, String> {
    let format = image::guess_format(bytes).map_err(|e| e.to_string())?;
    if format != ImageFormat::Png {
        return Err(format!("expected PNG, got {format:?}"));
    }
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(|e| e.to_string())?;
    Ok(decoded.to_rgba8())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::SystemTime;

    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::clock::FixedClock;
    use crate::model::DiffMetric;

    struct StubImages {
        bytes: std::result::Result<Vec<u8>, String>,
    }

    #[async_trait]
    impl ImageStore for StubImages {
        async fn get_image_bytes(&self, _digest: Digest) -> Result<Vec<u8>> {
            self.bytes.clone().map_err(|e| Error::ImageFetch { digest: String::new(), reason: e })
        }
    }

    #[derive(Default)]
    struct RecordingProblemStore {
        upserts: parking_lot::Mutex<Vec<(Digest, String)>>,
    }

    #[async_trait]
    impl DiffMetricStore for RecordingProblemStore {
        async fn write_batch(&self, _rows: &[DiffMetric]) -> Result<()> {
            Ok(())
        }
        async fn read_existing_pairs(&self, _left: &[Digest], _right: &[Digest]) -> Result<Vec<(Digest, Digest)>> {
            Ok(vec![])
        }
        async fn upsert_problem_image(&self, digest: Digest, error_message: &str, _error_ts: SystemTime) -> Result<()> {
            self.upserts.lock().push((digest, error_message.to_string()));
            Ok(())
        }
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn decodes_valid_png() {
        let images = Arc::new(StubImages { bytes: Ok(png_bytes(2, 2)) });
        let store = Arc::new(RecordingProblemStore::default());
        let clock = Arc::new(FixedClock::at_unix_secs(0));
        let fetcher = Fetcher::new(images, store.clone(), clock);
        let digest = Digest::from_bytes([0x01; crate::digest::DIGEST_LEN]);
        let img = fetcher.get_image(digest).await.unwrap();
        assert_eq!(img.dimensions(), (2, 2));
        assert!(store.upserts.lock().is_empty());
    }

    #[tokio::test]
    async fn records_problem_image_on_invalid_png() {
        let images = Arc::new(StubImages { bytes: Ok(b"not a png".to_vec()) });
        let store = Arc::new(RecordingProblemStore::default());
        let clock = Arc::new(FixedClock::at_unix_secs(0));
        let fetcher = Fetcher::new(images, store.clone(), clock);
        let digest = Digest::from_bytes([0x02; crate::digest::DIGEST_LEN]);
        let err = fetcher.get_image(digest).await.unwrap_err();
        assert!(matches!(err, Error::ImageDecode { .. }));
        let upserts = store.upserts.lock();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].0, digest);
    }

    #[tokio::test]
    async fn records_problem_image_on_fetch_failure() {
        let images = Arc::new(StubImages { bytes: Err("boom".into()) });
        let store = Arc::new(RecordingProblemStore::default());
        let clock = Arc::new(FixedClock::at_unix_secs(0));
        let fetcher = Fetcher::new(images, store.clone(), clock);
        let digest = Digest::from_bytes([0x03; crate::digest::DIGEST_LEN]);
        let err = fetcher.get_image(digest).await.unwrap_err();
        assert!(matches!(err, Error::ImageFetch { .. }));
        assert_eq!(store.upserts.lock().len(), 1);
    }
}
