//! Entities of §3: groupings, traces, triage labels, and the records the
//! worker produces.

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::digest::Digest;

/// An unordered mapping from key to value, e.g. `corpus → "round"`.
///
/// Two digests belong to the same grouping iff they were produced by traces
/// whose keys, restricted to the grouping-key set, are equal. `BTreeMap` is
/// used so groupings compare and hash deterministically regardless of
/// insertion order.
pub type Grouping = BTreeMap<String, String>;

/// Triage status of a digest within a grouping. Orthogonal to diff
/// selection: all labels are treated equivalently when diffing (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageLabel {
    /// Confirmed as an acceptable rendering.
    Positive,
    /// Confirmed as a rendering defect.
    Negative,
    /// Not yet reviewed.
    Untriaged,
}

/// One data point in a trace: the digest observed at a commit index, or
/// `None` if that commit carried no data for this trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPoint {
    /// Index of the commit, ascending with history.
    pub commit_index: u64,
    /// The digest observed at this commit, if any.
    pub digest: Option<Digest>,
}

/// An ordered sequence of commit/digest points for one test configuration,
/// plus the parameter map ignore rules match against. Read-only for the
/// worker.
#[derive(Debug, Clone)]
pub struct Trace {
    /// Full parameter map of this trace (a superset of the grouping keys).
    pub params: BTreeMap<String, String>,
    /// Data points ordered by ascending `commit_index`.
    pub points: Vec<CommitPoint>,
}

impl Trace {
    /// Whether `self.params`, restricted to `grouping`'s keys, equals
    /// `grouping`.
    #[must_use]
    pub fn matches_grouping(&self, grouping: &Grouping) -> bool {
        grouping
            .iter()
            .all(|(k, v)| self.params.get(k).is_some_and(|pv| pv == v))
    }

    /// The digests observed within `[lower, upper]` inclusive, in trace
    /// order, skipping missing points.
    pub fn digests_in_window(&self, lower: u64, upper: u64) -> impl Iterator<Item = Digest> + '_ {
        self.points
            .iter()
            .filter(move |p| p.commit_index >= lower && p.commit_index <= upper)
            .filter_map(|p| p.digest)
    }

    /// The digest with the most occurrences within `[lower, upper]`,
    /// breaking ties by the earliest-occurring digest byte value (for
    /// determinism).
    #[must_use]
    pub fn most_common_digest_in_window(&self, lower: u64, upper: u64) -> Option<Digest> {
        let mut counts: BTreeMap<Digest, usize> = BTreeMap::new();
        for d in self.digests_in_window(lower, upper) {
            *counts.entry(d).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by_key(|(digest, count)| (*count, std::cmp::Reverse(*digest)))
            .map(|(digest, _)| digest)
    }

    /// The digest at the most recent commit in `[lower, upper]`, if any.
    #[must_use]
    pub fn digest_at_most_recent_commit(&self, lower: u64, upper: u64) -> Option<Digest> {
        self.points
            .iter()
            .filter(|p| p.commit_index >= lower && p.commit_index <= upper && p.digest.is_some())
            .max_by_key(|p| p.commit_index)
            .and_then(|p| p.digest)
    }
}

/// A parameter-match predicate that masks matching traces from selection.
#[derive(Debug, Clone)]
pub struct IgnoreRule {
    /// Parameter key/value pairs that, if all present on a trace, mean the
    /// trace is ignored.
    pub matches: BTreeMap<String, String>,
}

impl IgnoreRule {
    /// Whether `trace` matches this rule (and is therefore ignored).
    #[must_use]
    pub fn matches_trace(&self, trace: &Trace) -> bool {
        self.matches
            .iter()
            .all(|(k, v)| trace.params.get(k).is_some_and(|pv| pv == v))
    }
}

/// The `[lower, upper]` inclusive commit-index bound derived from "the last
/// N data-bearing commits" (§3). `upper` is the newest commit index observed
/// across the traces being scanned; `lower` is the data-bearing commit index
/// `window_size` data points back from `upper`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitWindow {
    /// Inclusive lower bound: the earliest of the last N data-bearing commits.
    pub lower: u64,
    /// Inclusive upper bound: the most recent commit index with data.
    pub upper: u64,
}

impl CommitWindow {
    /// Derives the window from a set of traces: collects every data-bearing
    /// commit index across `traces`, then keeps the top `window_size` of
    /// them (descending), using the smallest as the lower bound. Returns
    /// `None` if no trace carries any data.
    #[must_use]
    pub fn derive<'a>(traces: impl Iterator<Item = &'a Trace>, window_size: usize) -> Option<Self> {
        let mut data_bearing: Vec<u64> = traces
            .flat_map(|t| t.points.iter())
            .filter(|p| p.digest.is_some())
            .map(|p| p.commit_index)
            .collect();
        data_bearing.sort_unstable();
        data_bearing.dedup();
        if data_bearing.is_empty() {
            return None;
        }
        let upper = *data_bearing.last().unwrap_or(&0);
        let take = window_size.min(data_bearing.len());
        let lower = data_bearing[data_bearing.len() - take];
        Some(Self { lower, upper })
    }
}

/// The persisted diff record for an ordered `(left, right)` pair (§3).
/// Immutable once written; `(left, right)` is the primary key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffMetric {
    /// The "from" digest of this directional row.
    pub left: Digest,
    /// The "to" digest of this directional row.
    pub right: Digest,
    /// Count of differing pixels, including the non-overlapping region.
    pub num_pixels_diff: u64,
    /// `num_pixels_diff` as a percentage of the output image's area.
    pub percent_pixels_diff: f32,
    /// Maximum per-channel absolute difference observed, `[R, G, B, A]`.
    pub max_rgba_diffs: [u8; 4],
    /// `max(max_rgba_diffs)`.
    pub max_channel_diff: u8,
    /// The combined scalar metric (§4.1).
    pub combined_metric: f32,
    /// Whether the two images' dimensions differ.
    pub dimensions_differ: bool,
    /// Wall-clock time the row was written, from the injected [`crate::clock::Clock`].
    pub ts: SystemTime,
}

/// The persisted failure-tracking record for one digest (§3). Upserted on
/// every fetch/decode failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemImage {
    /// The digest that failed to fetch or decode.
    pub digest: Digest,
    /// Cumulative count of failures observed for this digest.
    pub num_errors: u32,
    /// The most recent failure's human-readable message.
    pub latest_error: String,
    /// Wall-clock time of the most recent failure.
    pub error_ts: SystemTime,
}
