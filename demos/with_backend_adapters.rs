//! Wires `Coordinator` against the three real backend adapters, the shape
//! a production deployment uses. Requires reachable Postgres, Redis, and
//! S3-compatible endpoints; not a workspace member or a compiled target.

use std::sync::Arc;
use std::time::Duration;

use diffcalc_core::{CancellationToken, Config, Coordinator, Metrics, SystemClock};
use diffcalc_postgres::PostgresDiffMetricStore;
use diffcalc_redis::RedisDedupCache;
use diffcalc_s3::S3ImageStore;

/// A request carrier would normally own trace ingestion itself; this
/// sketch assumes a `TraceSource` implementation already exists for it.
struct YourTraceSource;

#[async_trait::async_trait]
impl diffcalc_core::TraceSource for YourTraceSource {
    async fn traces_for_grouping(&self, _grouping: &diffcalc_core::Grouping) -> diffcalc_core::Result<Vec<diffcalc_core::Trace>> {
        unimplemented!("backed by whatever ingestion store the request carrier owns")
    }

    async fn ignore_rules(&self) -> diffcalc_core::Result<Vec<diffcalc_core::IgnoreRule>> {
        unimplemented!("backed by whatever ingestion store the request carrier owns")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let diff_store = PostgresDiffMetricStore::new("host=localhost user=postgres dbname=diffcalc").await?;
    let dedup = RedisDedupCache::new("redis://localhost:6379").await?;
    let images = S3ImageStore::new("gold-image-corpus").await;

    let registry = prometheus::Registry::new();
    let metrics = Metrics::new(&registry)?;

    let coordinator = Coordinator::new(
        Arc::new(images),
        Arc::new(diff_store),
        Arc::new(dedup),
        Arc::new(YourTraceSource),
        Arc::new(SystemClock),
        Config::default(),
        Arc::new(metrics),
    );

    let mut grouping = diffcalc_core::Grouping::new();
    grouping.insert("corpus".to_string(), "gm".to_string());

    let report = coordinator
        .calculate_diffs(&grouping, &[], &[], Duration::from_secs(300), &CancellationToken::new())
        .await?;

    println!("wrote {} pairs", report.pairs_written);
    Ok(())
}
