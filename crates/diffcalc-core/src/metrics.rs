//! Prometheus metrics for one worker process (§2A expansion).

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Duration buckets for a single `calculate_diffs` invocation, in seconds.
const INVOCATION_LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Counters and histograms for the diff-calculation worker, registered
/// against a caller-supplied [`Registry`] so an embedding service can
/// combine them with its own metrics the way `RegistryMetrics` does.
#[derive(Clone)]
pub struct Metrics {
    /// Pairs for which a `DiffMetric` row was newly written.
    pub pairs_computed_total: IntCounter,
    /// Pairs skipped because the dedup cache or the persistence gateway
    /// already had a row, labeled by which source short-circuited it.
    pub pairs_skipped_total: IntCounterVec,
    /// Distinct digests that failed to fetch or decode.
    pub image_failures_total: IntCounter,
    /// Completed `calculate_diffs` invocations, labeled by outcome
    /// (`ok`, `cancelled`, `all_images_failed`, `error`).
    pub invocations_total: IntCounterVec,
    /// Wall-clock duration of a `calculate_diffs` invocation.
    pub invocation_duration_seconds: Histogram,
}

impl Metrics {
    /// Builds and registers a fresh set of metrics against `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let pairs_computed_total = IntCounter::with_opts(
            Opts::new("pairs_computed_total", "DiffMetric rows newly written").namespace("diffcalc"),
        )?;
        let pairs_skipped_total = IntCounterVec::new(
            Opts::new("pairs_skipped_total", "Pairs skipped without a new write").namespace("diffcalc"),
            &["reason"],
        )?;
        let image_failures_total = IntCounter::with_opts(
            Opts::new("image_failures_total", "Digests that failed to fetch or decode").namespace("diffcalc"),
        )?;
        let invocations_total = IntCounterVec::new(
            Opts::new("invocations_total", "Completed calculate_diffs invocations").namespace("diffcalc"),
            &["outcome"],
        )?;
        let invocation_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("invocation_duration_seconds", "calculate_diffs wall-clock duration")
                .namespace("diffcalc")
                .buckets(INVOCATION_LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(pairs_computed_total.clone()))?;
        registry.register(Box::new(pairs_skipped_total.clone()))?;
        registry.register(Box::new(image_failures_total.clone()))?;
        registry.register(Box::new(invocations_total.clone()))?;
        registry.register(Box::new(invocation_duration_seconds.clone()))?;

        Ok(Self {
            pairs_computed_total,
            pairs_skipped_total,
            image_failures_total,
            invocations_total,
            invocation_duration_seconds,
        })
    }

    /// Builds metrics against a fresh, private registry — the common case
    /// for tests and for services that scrape this crate's metrics alone.
    pub fn new_standalone() -> Result<(Self, Registry), prometheus::Error> {
        let registry = Registry::new();
        let metrics = Self::new(&registry)?;
        Ok((metrics, registry))
    }
}
