//! §4.4: the diff-pair planner.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::digest::Digest;
use crate::error::Result;
use crate::store::DedupCache;

/// Produces the ordered list of `(left, right)` pairs to compute for a
/// selection, deduplicating against the external cache (§4.4).
pub struct Planner<C: ?Sized> {
    cache: Arc<C>,
    config: Config,
}

impl<C: DedupCache + ?Sized> Planner<C> {
    /// Builds a planner over the given dedup cache and configuration.
    pub fn new(cache: Arc<C>, config: Config) -> Self {
        Self { cache, config }
    }

    /// Plans the pairs to compute for `left x right`, filtering out pairs
    /// the dedup cache already knows about.
    pub async fn plan(&self, left: &BTreeSet<Digest>, right: &BTreeSet<Digest>) -> Result<Vec<(Digest, Digest)>> {
        let within_cutoff = left.len().saturating_mul(right.len()) <= self.config.cutoff_area();
        let (candidate_lefts, candidate_rights): (Vec<Digest>, BTreeSet<Digest>) = if within_cutoff {
            (left.iter().copied().collect(), right.iter().copied().collect())
        } else {
            let sample = self.compute_subset(left, right);
            (sample.clone(), sample.into_iter().collect())
        };

        let mut pairs = Vec::new();
        for l in candidate_lefts {
            let rights: Vec<Digest> = candidate_rights.iter().copied().filter(|r| *r != l).collect();
            if rights.is_empty() {
                continue;
            }
            let not_yet_done = self.cache.filter(l, &rights).await?;
            for r in not_yet_done {
                pairs.push((l, r));
            }
        }
        Ok(pairs)
    }

    /// The bounded, deterministic sample used when `left x right` exceeds
    /// `cutoff^2` (§4.4, §9, §10): the first `compute_subset_size` digests
    /// of `left` in sorted-byte order, intersected with `right`. Both `left`
    /// and `right` loops draw from this same sample, bounding the subset
    /// branch's output by `compute_subset_size^2` regardless of input size.
    fn compute_subset(&self, left: &BTreeSet<Digest>, right: &BTreeSet<Digest>) -> Vec<Digest> {
        left.iter()
            .take(self.config.compute_subset_size)
            .filter(|d| right.contains(d))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    fn digest(b: u8) -> Digest {
        Digest::from_bytes([b; crate::digest::DIGEST_LEN])
    }

    struct NoopCache;

    #[async_trait]
    impl DedupCache for NoopCache {
        async fn filter(&self, _left: Digest, candidates: &[Digest]) -> Result<Vec<Digest>> {
            Ok(candidates.to_vec())
        }
        async fn record(&self, _left: Digest, _right: Digest) -> Result<()> {
            Ok(())
        }
    }

    struct AllDoneCache;

    #[async_trait]
    impl DedupCache for AllDoneCache {
        async fn filter(&self, _left: Digest, _candidates: &[Digest]) -> Result<Vec<Digest>> {
            Ok(vec![])
        }
        async fn record(&self, _left: Digest, _right: Digest) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn full_product_excludes_self_pairs() {
        let set: BTreeSet<Digest> = [1, 2, 3, 4].into_iter().map(digest).collect();
        let planner = Planner::new(Arc::new(NoopCache), Config::default());
        let pairs = planner.plan(&set, &set).await.unwrap();
        assert_eq!(pairs.len(), 4 * 3);
        assert!(pairs.iter().all(|(l, r)| l != r));
    }

    #[tokio::test]
    async fn dedup_cache_removes_already_computed_pairs() {
        let set: BTreeSet<Digest> = [1, 2, 3].into_iter().map(digest).collect();
        let planner = Planner::new(Arc::new(AllDoneCache), Config::default());
        let pairs = planner.plan(&set, &set).await.unwrap();
        assert!(pairs.is_empty());
    }

    #[tokio::test]
    async fn large_grid_uses_bounded_compute_subset() {
        let set: BTreeSet<Digest> = (0u8..250).map(digest).collect();
        let cfg = Config { compute_subset_cutoff: 10, compute_subset_size: 5, ..Config::default() };
        let planner = Planner::new(Arc::new(NoopCache), cfg);
        let pairs = planner.plan(&set, &set).await.unwrap();
        // At most subset_size^2 - subset_size (self-pairs excluded) rows.
        assert!(pairs.len() <= 5 * 5);
        assert!(!pairs.is_empty());
    }

    #[tokio::test]
    async fn subset_sampling_is_deterministic_across_runs() {
        let set: BTreeSet<Digest> = (0u8..250).map(digest).collect();
        let cfg = Config { compute_subset_cutoff: 10, compute_subset_size: 5, ..Config::default() };
        let planner = Planner::new(Arc::new(NoopCache), cfg);
        let first = planner.plan(&set, &set).await.unwrap();
        let second = planner.plan(&set, &set).await.unwrap();
        assert_eq!(first, second);
    }
}
