//! In-memory implementations of the §6 traits, for use in this crate's own
//! tests and by downstream services testing their own integration against
//! this crate. Mirrors the shape of an in-memory checkpointer: cheap to
//! construct, `Clone`, backed by a lock around a plain collection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::model::{DiffMetric, Grouping, IgnoreRule, ProblemImage, Trace};
use crate::store::{DedupCache, DiffMetricStore, ImageStore, TraceSource};

/// An in-memory blob store keyed by digest.
///
/// Digests can be pre-seeded to fail with a fixed error message, to exercise
/// the fetcher's problem-image bookkeeping (§4.2) without a real backend.
#[derive(Clone, Default)]
pub struct InMemoryImageStore {
    bytes: Arc<Mutex<HashMap<Digest, std::result::Result<Vec<u8>, String>>>>,
}

impl InMemoryImageStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `digest` with valid PNG bytes.
    pub fn put(&self, digest: Digest, bytes: Vec<u8>) {
        self.bytes.lock().insert(digest, Ok(bytes));
    }

    /// Seeds `digest` so every fetch of it fails with `reason`.
    pub fn fail(&self, digest: Digest, reason: impl Into<String>) {
        self.bytes.lock().insert(digest, Err(reason.into()));
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn get_image_bytes(&self, digest: Digest) -> Result<Vec<u8>> {
        match self.bytes.lock().get(&digest) {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(reason)) => Err(Error::ImageFetch { digest: digest.to_hex(), reason: reason.clone() }),
            None => Err(Error::ImageFetch { digest: digest.to_hex(), reason: "no such digest".to_string() }),
        }
    }
}

/// An in-memory `DiffMetrics` / `ProblemImages` pair of tables.
#[derive(Clone, Default)]
pub struct InMemoryDiffMetricStore {
    rows: Arc<Mutex<HashMap<(Digest, Digest), DiffMetric>>>,
    problem_images: Arc<Mutex<HashMap<Digest, ProblemImage>>>,
}

impl InMemoryDiffMetricStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-inserts a row directly, bypassing `write_batch`'s conflict
    /// semantics. Used to seed sentinel rows that a run must preserve.
    pub fn seed_row(&self, row: DiffMetric) {
        self.rows.lock().insert((row.left, row.right), row);
    }

    /// Pre-inserts a problem-image row, to exercise "increment on top of an
    /// existing count" (§8 scenario 5).
    pub fn seed_problem_image(&self, problem: ProblemImage) {
        self.problem_images.lock().insert(problem.digest, problem);
    }

    /// The number of `DiffMetric` rows currently stored.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }

    /// A snapshot of every stored row.
    #[must_use]
    pub fn rows(&self) -> Vec<DiffMetric> {
        self.rows.lock().values().copied().collect()
    }

    /// The stored row for `(left, right)`, if any.
    #[must_use]
    pub fn get_row(&self, left: Digest, right: Digest) -> Option<DiffMetric> {
        self.rows.lock().get(&(left, right)).copied()
    }

    /// A snapshot of every stored problem-image row.
    #[must_use]
    pub fn problem_images(&self) -> Vec<ProblemImage> {
        self.problem_images.lock().values().cloned().collect()
    }
}

#[async_trait]
impl DiffMetricStore for InMemoryDiffMetricStore {
    async fn write_batch(&self, batch: &[DiffMetric]) -> Result<()> {
        let mut rows = self.rows.lock();
        for row in batch {
            // Primary-key conflict is "already present"; never overwritten.
            rows.entry((row.left, row.right)).or_insert(*row);
        }
        Ok(())
    }

    async fn read_existing_pairs(&self, left: &[Digest], right: &[Digest]) -> Result<Vec<(Digest, Digest)>> {
        let left_set: HashSet<Digest> = left.iter().copied().collect();
        let right_set: HashSet<Digest> = right.iter().copied().collect();
        Ok(self
            .rows
            .lock()
            .keys()
            .filter(|(l, r)| left_set.contains(l) && right_set.contains(r))
            .copied()
            .collect())
    }

    async fn upsert_problem_image(&self, digest: Digest, error_message: &str, error_ts: SystemTime) -> Result<()> {
        let mut problems = self.problem_images.lock();
        problems
            .entry(digest)
            .and_modify(|p| {
                p.num_errors += 1;
                p.latest_error = error_message.to_string();
                p.error_ts = error_ts;
            })
            .or_insert(ProblemImage {
                digest,
                num_errors: 1,
                latest_error: error_message.to_string(),
                error_ts,
            });
        Ok(())
    }
}

/// An in-memory dedup cache keyed by the canonicalized unordered pair.
#[derive(Clone, Default)]
pub struct InMemoryDedupCache {
    done: Arc<Mutex<HashSet<(Digest, Digest)>>>,
}

impl InMemoryDedupCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of distinct pairs recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.done.lock().len()
    }

    /// Whether the cache has no recorded pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.done.lock().is_empty()
    }
}

#[async_trait]
impl DedupCache for InMemoryDedupCache {
    async fn filter(&self, left: Digest, candidates: &[Digest]) -> Result<Vec<Digest>> {
        let done = self.done.lock();
        Ok(candidates
            .iter()
            .filter(|r| !done.contains(&Digest::canonical_pair(left, **r)))
            .copied()
            .collect())
    }

    async fn record(&self, left: Digest, right: Digest) -> Result<()> {
        self.done.lock().insert(Digest::canonical_pair(left, right));
        Ok(())
    }
}

/// An in-memory trace source: a fixed set of traces and ignore rules,
/// filtered by grouping on read.
#[derive(Clone, Default)]
pub struct InMemoryTraceSource {
    traces: Arc<Mutex<Vec<Trace>>>,
    ignore_rules: Arc<Mutex<Vec<IgnoreRule>>>,
}

impl InMemoryTraceSource {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one trace.
    pub fn add_trace(&self, trace: Trace) {
        self.traces.lock().push(trace);
    }

    /// Adds one ignore rule.
    pub fn add_ignore_rule(&self, rule: IgnoreRule) {
        self.ignore_rules.lock().push(rule);
    }
}

#[async_trait]
impl TraceSource for InMemoryTraceSource {
    async fn traces_for_grouping(&self, grouping: &Grouping) -> Result<Vec<Trace>> {
        Ok(self.traces.lock().iter().filter(|t| t.matches_grouping(grouping)).cloned().collect())
    }

    async fn ignore_rules(&self) -> Result<Vec<IgnoreRule>> {
        Ok(self.ignore_rules.lock().clone())
    }
}

/// Builds a minimal single-param grouping, a convenience for tests that
/// don't care about the exact key set.
#[must_use]
pub fn simple_grouping(key: &str, value: &str) -> Grouping {
    let mut g = BTreeMap::new();
    g.insert(key.to_string(), value.to_string());
    g
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(b: u8) -> Digest {
        Digest::from_bytes([b; crate::digest::DIGEST_LEN])
    }

    #[tokio::test]
    async fn dedup_cache_is_order_independent() {
        let cache = InMemoryDedupCache::new();
        cache.record(digest(1), digest(2)).await.unwrap();
        let remaining = cache.filter(digest(2), &[digest(1), digest(3)]).await.unwrap();
        assert_eq!(remaining, vec![digest(3)]);
    }

    #[tokio::test]
    async fn diff_store_write_batch_does_not_overwrite() {
        let store = InMemoryDiffMetricStore::new();
        let mut row = DiffMetric {
            left: digest(1),
            right: digest(2),
            num_pixels_diff: 999,
            percent_pixels_diff: 0.0,
            max_rgba_diffs: [0; 4],
            max_channel_diff: 0,
            combined_metric: 0.0,
            dimensions_differ: false,
            ts: SystemTime::UNIX_EPOCH,
        };
        store.seed_row(row);
        row.num_pixels_diff = 1;
        store.write_batch(&[row]).await.unwrap();
        assert_eq!(store.get_row(digest(1), digest(2)).unwrap().num_pixels_diff, 999);
    }

    #[tokio::test]
    async fn problem_image_increments_on_top_of_existing_count() {
        let store = InMemoryDiffMetricStore::new();
        store.seed_problem_image(ProblemImage {
            digest: digest(9),
            num_errors: 100,
            latest_error: "old".to_string(),
            error_ts: SystemTime::UNIX_EPOCH,
        });
        store.upsert_problem_image(digest(9), "new failure", SystemTime::UNIX_EPOCH).await.unwrap();
        let problem = store.problem_images().into_iter().find(|p| p.digest == digest(9)).unwrap();
        assert_eq!(problem.num_errors, 101);
        assert_eq!(problem.latest_error, "new failure");
    }
}
