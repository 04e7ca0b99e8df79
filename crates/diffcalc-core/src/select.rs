//! §4.3: the digest selector.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::model::{CommitWindow, Grouping, IgnoreRule, Trace};
use crate::store::TraceSource;

/// The two digest sets a selection produces. Per §4.3, `left` additionally
/// carries digests seen only on ignored traces; `right` never does, so a
/// digest ignored on every trace it appears on is diffed against visible
/// digests but never against another ignored-only digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Digests worth diffing *from*: visible digests plus ignored-only ones.
    pub left: BTreeSet<Digest>,
    /// Digests worth diffing *to*: visible digests only.
    pub right: BTreeSet<Digest>,
}

/// Builds `(left, right)` digest sets for a grouping (§4.3).
pub struct Selector<T: ?Sized> {
    traces: Arc<T>,
    config: Config,
}

impl<T: TraceSource + ?Sized> Selector<T> {
    /// Builds a selector over the given trace source and configuration.
    pub fn new(traces: Arc<T>, config: Config) -> Self {
        Self { traces, config }
    }

    /// Computes the selection for `grouping`. `extra_digests_left` and
    /// `extra_digests_right` are unioned unconditionally into their
    /// respective sides (§4.3).
    pub async fn select_for_grouping(
        &self,
        grouping: &Grouping,
        extra_digests_left: &[Digest],
        extra_digests_right: &[Digest],
    ) -> Result<Selection> {
        if grouping.is_empty() {
            return Err(Error::InvalidRequest("grouping must not be empty".to_string()));
        }

        let all_traces = self.traces.traces_for_grouping(grouping).await?;
        let ignore_rules = self.traces.ignore_rules().await?;

        let Some(window) = CommitWindow::derive(all_traces.iter(), self.config.commit_window_size) else {
            // No data-bearing commits at all: the selection is just the
            // caller-supplied extras, if any.
            let left: BTreeSet<Digest> = extra_digests_left.iter().copied().collect();
            let right: BTreeSet<Digest> = extra_digests_right.iter().copied().collect();
            return Ok(Selection { left, right });
        };

        let (visible_traces, ignored_traces): (Vec<&Trace>, Vec<&Trace>) =
            all_traces.iter().partition(|t| !is_ignored(t, &ignore_rules));

        let mut triaged_and_common = BTreeSet::new();
        let mut recently_seen = BTreeSet::new();
        for trace in &visible_traces {
            if let Some(d) = trace.most_common_digest_in_window(window.lower, window.upper) {
                triaged_and_common.insert(d);
            }
            if let Some(d) = trace.digest_at_most_recent_commit(window.lower, window.upper) {
                triaged_and_common.insert(d);
            }
            recently_seen.extend(trace.digests_in_window(window.lower, window.upper));
        }

        let mut visible: BTreeSet<Digest> = triaged_and_common;
        visible.extend(recently_seen);

        // Digests seen only on ignored traces: present in left (so they can
        // be diffed against visible digests) but never in right (so two
        // ignored-only digests are never planned against each other).
        let mut ignored_only = BTreeSet::new();
        for trace in &ignored_traces {
            ignored_only.extend(trace.digests_in_window(window.lower, window.upper));
        }
        ignored_only.retain(|d| !visible.contains(d));

        let mut left = visible.clone();
        left.extend(ignored_only);
        left.extend(extra_digests_left.iter().copied());

        let mut right = visible;
        right.extend(extra_digests_right.iter().copied());

        Ok(Selection { left, right })
    }
}

fn is_ignored(trace: &Trace, rules: &[IgnoreRule]) -> bool {
    rules.iter().any(|r| r.matches_trace(trace))
}
