//! The external interfaces of §6: traits only. Concrete backends live in
//! sibling crates (`diffcalc-postgres`, `diffcalc-redis`, `diffcalc-s3`);
//! in-memory implementations for tests live in [`crate::test_support`].

use async_trait::async_trait;

use crate::digest::Digest;
use crate::error::Result;
use crate::model::DiffMetric;

/// Fetches raw image bytes for a digest from external blob storage.
///
/// Digests are passed as lowercase hex; no path prefix is assumed (§6).
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Returns the raw bytes stored under `digest`, or an error if the
    /// fetch itself failed (network, missing object, etc). Decoding is the
    /// fetcher's job (§4.2), not the store's.
    async fn get_image_bytes(&self, digest: Digest) -> Result<Vec<u8>>;
}

/// The relational store backing `DiffMetrics` and `ProblemImages` (§4.6,
/// §6): a thin, batched writer plus the read used to filter already-computed
/// pairs.
#[async_trait]
pub trait DiffMetricStore: Send + Sync {
    /// Inserts `rows`. A primary-key conflict on `(left, right)` is treated
    /// as "already present" and silently skipped rather than erroring.
    async fn write_batch(&self, rows: &[DiffMetric]) -> Result<()>;

    /// Returns the subset of `left x right` pairs that already have a
    /// `DiffMetric` row. Consulted by the coordinator (§4.5) as a pre-filter
    /// before dispatching pairs to workers, complementing the dedup cache
    /// the planner (§4.4) uses: a cold dedup cache must not cause rework
    /// that reaches all the way to a redundant persistence write.
    async fn read_existing_pairs(&self, left: &[Digest], right: &[Digest]) -> Result<Vec<(Digest, Digest)>>;

    /// Increments `num_errors` for `digest`, replacing `latest_error` and
    /// `error_ts`.
    async fn upsert_problem_image(&self, digest: Digest, error_message: &str, error_ts: std::time::SystemTime) -> Result<()>;
}

/// The advisory, evictable "already computed" cache of §3/§4.4.
///
/// Implementations may be lossy in either direction for `filter` *except*
/// that a false "already done" is never acceptable from the coordinator's
/// perspective — this crate only calls [`DedupCache::record`] after a
/// successful [`DiffMetricStore::write_batch`] (§4.4, §5).
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Given `left` and a list of candidate `right` digests, returns the
    /// subset not already known to be computed against `left`.
    async fn filter(&self, left: Digest, candidates: &[Digest]) -> Result<Vec<Digest>>;

    /// Records that `(left, right)` has been computed and persisted.
    async fn record(&self, left: Digest, right: Digest) -> Result<()>;
}

/// Read-only access to triaged digests and traces, used by the selector
/// (§4.3) and exposed at the inbound boundary (§6) for the request carrier's
/// own use.
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Traces matching `grouping`, irrespective of ignore rules — the
    /// selector applies ignore filtering itself so that it can distinguish
    /// "ignored-only" digests from "visible" ones (§4.3).
    async fn traces_for_grouping(&self, grouping: &crate::model::Grouping) -> Result<Vec<crate::model::Trace>>;

    /// The configured ignore rules, evaluated against each trace's params.
    async fn ignore_rules(&self) -> Result<Vec<crate::model::IgnoreRule>>;
}
