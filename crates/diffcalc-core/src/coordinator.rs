//! §4.5: the worker coordinator. Ties the selector, planner, fetcher and
//! comparator together behind a bounded worker pool with batched writes.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::comparator;
use crate::config::Config;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::metrics::Metrics;
use crate::model::{DiffMetric, Grouping};
use crate::plan::Planner;
use crate::select::Selector;
use crate::store::{DedupCache, DiffMetricStore, ImageStore, TraceSource};

/// Summary of one `calculate_diffs` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    /// Rows newly written to the persistence gateway.
    pub pairs_written: usize,
    /// Planned pairs dropped because a `DiffMetric` row already existed.
    pub pairs_skipped_existing: usize,
    /// Distinct digests that failed to fetch or decode.
    pub images_failed: usize,
}

/// The bound, shared set of collaborators behind one `calculate_diffs`
/// entry point. Trait objects rather than generics: a coordinator otherwise
/// carries one type parameter per collaborator, which stops scaling once
/// backend adapter crates (§6A) are swapped in independently of each other.
pub struct Coordinator {
    images: Arc<dyn ImageStore>,
    diff_store: Arc<dyn DiffMetricStore>,
    dedup: Arc<dyn DedupCache>,
    traces: Arc<dyn TraceSource>,
    clock: Arc<dyn Clock>,
    config: Config,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    /// Builds a coordinator over the given collaborators.
    pub fn new(
        images: Arc<dyn ImageStore>,
        diff_store: Arc<dyn DiffMetricStore>,
        dedup: Arc<dyn DedupCache>,
        traces: Arc<dyn TraceSource>,
        clock: Arc<dyn Clock>,
        config: Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { images, diff_store, dedup, traces, clock, config, metrics }
    }

    /// Computes and persists every outstanding diff for `grouping` (§4.5).
    ///
    /// `extra_digests_left` and `extra_digests_right` are passed straight
    /// through to the selector (§4.3), which unions each into its
    /// respective side; they are not merged here because the selector's
    /// `left` and `right` sets are not the same set (ignored-only digests
    /// appear only in `left`).
    pub async fn calculate_diffs(
        &self,
        grouping: &Grouping,
        extra_digests_left: &[Digest],
        extra_digests_right: &[Digest],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let start = Instant::now();
        let outcome = self.run(grouping, extra_digests_left, extra_digests_right, deadline, cancel).await;

        let outcome_label = match &outcome {
            Ok(_) => "ok",
            Err(Error::Cancelled) => "cancelled",
            Err(Error::AllImagesFailed { .. }) => "all_images_failed",
            Err(_) => "error",
        };
        self.metrics.invocations_total.with_label_values(&[outcome_label]).inc();
        self.metrics.invocation_duration_seconds.observe(start.elapsed().as_secs_f64());
        outcome
    }

    async fn run(
        &self,
        grouping: &Grouping,
        extra_digests_left: &[Digest],
        extra_digests_right: &[Digest],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Report> {
        let deadline_at = Instant::now() + deadline;

        let selector = Selector::new(Arc::clone(&self.traces), self.config);
        let selection = selector.select_for_grouping(grouping, extra_digests_left, extra_digests_right).await?;

        let planner = Planner::new(Arc::clone(&self.dedup), self.config);
        let mut pairs = planner.plan(&selection.left, &selection.right).await?;
        if pairs.is_empty() {
            return Ok(Report::default());
        }

        let left_digests: Vec<Digest> = selection.left.iter().copied().collect();
        let right_digests: Vec<Digest> = selection.right.iter().copied().collect();
        let existing: HashSet<(Digest, Digest)> = self
            .timed(self.config.query_timeout_ms, self.diff_store.read_existing_pairs(&left_digests, &right_digests))
            .await?
            .into_iter()
            .collect();

        let before = pairs.len();
        pairs.retain(|pair| !existing.contains(pair));
        let pairs_skipped_existing = before - pairs.len();
        self.metrics.pairs_skipped_total.with_label_values(&["existing_row"]).inc_by(pairs_skipped_existing as u64);

        if pairs.is_empty() {
            return Ok(Report { pairs_written: 0, pairs_skipped_existing, images_failed: 0 });
        }

        let mut distinct: BTreeSet<Digest> = BTreeSet::new();
        for (l, r) in &pairs {
            distinct.insert(*l);
            distinct.insert(*r);
        }

        let fetcher = Fetcher::new(Arc::clone(&self.images), Arc::clone(&self.diff_store), Arc::clone(&self.clock));
        let image_cache: DashMap<Digest, Arc<image::RgbaImage>> = DashMap::new();
        let failed: DashMap<Digest, ()> = DashMap::new();

        let fetch_results: Vec<(Digest, Result<image::RgbaImage>)> = stream::iter(distinct.iter().copied())
            .map(|digest| {
                let fetcher = fetcher.clone();
                async move { (digest, fetcher.get_image(digest).await) }
            })
            .buffer_unordered(self.config.worker_count.max(1))
            .collect()
            .await;

        for (digest, result) in fetch_results {
            match result {
                Ok(image) => {
                    image_cache.insert(digest, Arc::new(image));
                }
                Err(_) => {
                    failed.insert(digest, ());
                }
            }
        }
        self.metrics.image_failures_total.inc_by(failed.len() as u64);

        if !distinct.is_empty() && failed.len() == distinct.len() {
            return Err(Error::AllImagesFailed { count: failed.len() });
        }

        pairs.retain(|(l, r)| !failed.contains_key(l) && !failed.contains_key(r));
        if pairs.is_empty() {
            return Ok(Report { pairs_written: 0, pairs_skipped_existing, images_failed: failed.len() });
        }

        let batch: Arc<AsyncMutex<Vec<DiffMetric>>> = Arc::new(AsyncMutex::new(Vec::new()));
        let written = Arc::new(AtomicUsize::new(0));
        let image_cache = Arc::new(image_cache);

        let mut computations = Box::pin(
            stream::iter(pairs.into_iter())
                .map(|(l, r)| {
                    let image_cache = Arc::clone(&image_cache);
                    let cancel = cancel.clone();
                    let clock = Arc::clone(&self.clock);
                    async move {
                        if cancel.is_cancelled() || Instant::now() >= deadline_at {
                            return None;
                        }
                        let left_image = image_cache.get(&l)?.clone();
                        let right_image = image_cache.get(&r)?.clone();
                        let (stats, _diff_image) = comparator::diff(&left_image, &right_image);
                        Some(stats.into_metric(l, r, clock.now()))
                    }
                })
                .buffer_unordered(self.config.worker_count.max(1)),
        );

        let mut cancelled = false;
        while let Some(outcome) = computations.next().await {
            match outcome {
                Some(metric) => {
                    let rows_to_flush = {
                        let mut guard = batch.lock().await;
                        guard.push(metric);
                        if guard.len() >= self.config.batch_size {
                            Some(std::mem::take(&mut *guard))
                        } else {
                            None
                        }
                    };
                    if let Some(rows) = rows_to_flush {
                        self.flush(&rows).await?;
                        written.fetch_add(rows.len(), Ordering::SeqCst);
                    }
                }
                None => cancelled = true,
            }
        }

        let remaining = {
            let mut guard = batch.lock().await;
            std::mem::take(&mut *guard)
        };
        if !remaining.is_empty() {
            self.flush(&remaining).await?;
            written.fetch_add(remaining.len(), Ordering::SeqCst);
        }

        if cancelled {
            return Err(Error::Cancelled);
        }

        Ok(Report {
            pairs_written: written.load(Ordering::SeqCst),
            pairs_skipped_existing,
            images_failed: failed.len(),
        })
    }

    /// Writes `rows`, then records both orderings of each pair in the dedup
    /// cache — strictly after the write succeeds, so a cold cache never
    /// causes a missing row (§4.4, §5, §9).
    async fn flush(&self, rows: &[DiffMetric]) -> Result<()> {
        self.timed(self.config.insert_timeout_ms, self.diff_store.write_batch(rows)).await?;
        for row in rows {
            if let Err(err) = self.dedup.record(row.left, row.right).await {
                warn!(left = %row.left, right = %row.right, error = %err, "failed to record dedup cache entry");
            }
            if let Err(err) = self.dedup.record(row.right, row.left).await {
                warn!(left = %row.right, right = %row.left, error = %err, "failed to record dedup cache entry");
            }
        }
        self.metrics.pairs_computed_total.inc_by(rows.len() as u64);
        Ok(())
    }

    async fn timed<T>(&self, timeout_ms: u64, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(Duration::from_millis(timeout_ms), fut)
            .await
            .map_err(|_| Error::Storage("operation timed out".to_string()))?
    }
}
