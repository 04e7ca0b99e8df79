//! Worker configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the diff-calculation worker (§6).
///
/// Deserializable so an embedding service can load it from its own config
/// file alongside its other settings; every field has a reference-deployment
/// default via [`Config::default`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Size of the bounded worker pool that computes diffs concurrently.
    pub worker_count: usize,
    /// `cutoff` in §4.4: above `cutoff^2` candidate pairs, the planner
    /// switches from the full product to the bounded compute-subset.
    pub compute_subset_cutoff: usize,
    /// Number of digests sampled from `left` when the compute-subset branch
    /// is active (§10).
    pub compute_subset_size: usize,
    /// Number of `DiffMetric` rows accumulated before a persistence flush.
    pub batch_size: usize,
    /// Deadline for a single read against an external store, in milliseconds.
    pub query_timeout_ms: u64,
    /// Deadline for a single write against an external store, in milliseconds.
    pub insert_timeout_ms: u64,
    /// Width, in data-bearing commits, of the recency window scanned by the
    /// selector (§3, §4.3).
    pub commit_window_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 4,
            compute_subset_cutoff: 300,
            compute_subset_size: 50,
            batch_size: 500,
            query_timeout_ms: 5_000,
            insert_timeout_ms: 30_000,
            commit_window_size: 100,
        }
    }
}

impl Config {
    /// `compute_subset_cutoff` squared, the threshold §4.4 compares the
    /// candidate product size against.
    #[must_use]
    pub fn cutoff_area(&self) -> usize {
        self.compute_subset_cutoff.saturating_mul(self.compute_subset_cutoff)
    }
}
