//! Drives one `calculate_diffs` invocation entirely against in-memory test
//! doubles, for trying out selection/planning/diffing behavior without a
//! real database, cache, or blob store.
//!
//! Not a workspace member; paste the body into a scratch binary that
//! depends on `diffcalc-core` to run it.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use diffcalc_core::test_support::{simple_grouping, InMemoryDedupCache, InMemoryDiffMetricStore, InMemoryImageStore, InMemoryTraceSource};
use diffcalc_core::{CancellationToken, CommitPoint, Config, Coordinator, Digest, FixedClock, Metrics, Trace};
use image::{ImageFormat, Rgba, RgbaImage};

fn png_bytes(color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(4, 4, Rgba(color));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let images = InMemoryImageStore::new();
    let traces = InMemoryTraceSource::new();
    for (name, byte, color) in [
        ("circle_8888", 0x01u8, [255, 0, 0, 255]),
        ("circle_gles", 0x02, [250, 5, 2, 255]),
        ("square_8888", 0x03, [0, 0, 255, 255]),
    ] {
        let digest = Digest::from_bytes([byte; diffcalc_core::DIGEST_LEN]);
        images.put(digest, png_bytes(color));
        traces.add_trace(Trace {
            params: [("corpus".to_string(), "gm".to_string()), ("name".to_string(), name.to_string())]
                .into_iter()
                .collect(),
            points: vec![CommitPoint { commit_index: 1, digest: Some(digest) }],
        });
    }

    let (metrics, _registry) = Metrics::new_standalone().unwrap();
    let coordinator = Coordinator::new(
        Arc::new(images),
        Arc::new(InMemoryDiffMetricStore::new()),
        Arc::new(InMemoryDedupCache::new()),
        Arc::new(traces),
        Arc::new(FixedClock::at_unix_secs(1_700_000_000)),
        Config::default(),
        Arc::new(metrics),
    );

    let report = coordinator
        .calculate_diffs(&simple_grouping("corpus", "gm"), &[], &[], Duration::from_secs(30), &CancellationToken::new())
        .await
        .expect("calculate_diffs");

    println!(
        "wrote {} pairs, skipped {} existing, {} images failed",
        report.pairs_written, report.pairs_skipped_existing, report.images_failed
    );
}
