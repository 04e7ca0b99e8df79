//! Pixel-level image comparison and worker coordination for visual
//! regression diffing.
//!
//! This crate owns the pure comparison arithmetic (§4.1), the digest
//! selection and pairing logic that decides what to compare (§4.3, §4.4),
//! and the coordinator that drives a bounded worker pool over the result
//! (§4.5). Concrete storage backends live in sibling crates
//! (`diffcalc-postgres`, `diffcalc-redis`, `diffcalc-s3`); this crate only
//! depends on the [`store`] traits they implement.

pub mod cancel;
pub mod clock;
pub mod comparator;
pub mod config;
pub mod coordinator;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod plan;
pub mod select;
pub mod store;
pub mod test_support;

pub use cancel::CancellationToken;
pub use clock::{Clock, FixedClock, SystemClock};
pub use comparator::{diff, DiffStats};
pub use config::Config;
pub use coordinator::{Coordinator, Report};
pub use digest::{Digest, DIGEST_LEN};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use model::{CommitPoint, CommitWindow, DiffMetric, Grouping, IgnoreRule, ProblemImage, Trace, TriageLabel};
pub use store::{DedupCache, DiffMetricStore, ImageStore, TraceSource};
