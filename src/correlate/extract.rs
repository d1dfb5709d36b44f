//! Optional-field traversal over raw JSON payloads.
//!
//! Upstream records are deeply nested and full of optional branches.
//! [`value_at`] walks a typed step path and returns `None` instead of
//! panicking on a missing key or index; [`MissingKeyStats`] counts which
//! paths were absent so the run can log one aggregate summary instead of
//! a line per record.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value;

/// One traversal step into a JSON tree.
#[derive(Debug, Clone, Copy)]
pub enum Step<'a> {
    Key(&'a str),
    Index(usize),
}

/// Walk `steps` from `root`, returning `None` as soon as a key or index
/// is missing or the node has the wrong shape.
pub fn value_at<'a>(root: &'a Value, steps: &[Step<'_>]) -> Option<&'a Value> {
    let mut current = root;
    for step in steps {
        current = match step {
            Step::Key(key) => current.get(key)?,
            Step::Index(index) => current.get(index)?,
        };
    }
    Some(current)
}

/// Counter map of missing traversal paths, keyed by the dotted path label.
/// Explicit state owned by the caller, flushed to a log summary at the end
/// of a run.
#[derive(Debug, Default)]
pub struct MissingKeyStats {
    counts: BTreeMap<String, u64>,
}

impl MissingKeyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a path and count a miss when it is absent.
    pub fn lookup<'a>(&mut self, root: &'a Value, steps: &[Step<'_>]) -> Option<&'a Value> {
        let found = value_at(root, steps);
        if found.is_none() {
            *self.counts.entry(label(steps)).or_insert(0) += 1;
        }
        found
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn total_misses(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(path, count)| (path.as_str(), *count))
    }

    /// Emit the end-of-run aggregate summary.
    pub fn log_summary(&self) {
        if self.is_empty() {
            return;
        }
        for (path, count) in self.iter() {
            tracing::info!(path, count, "records were missing this field");
        }
        tracing::info!(
            distinct_paths = self.counts.len(),
            total = self.total_misses(),
            "missing-field summary"
        );
    }
}

fn label(steps: &[Step<'_>]) -> String {
    let mut out = String::new();
    for step in steps {
        match step {
            Step::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            Step::Index(index) => {
                let _ = write!(out, "[{index}]");
            }
        }
    }
    out
}
