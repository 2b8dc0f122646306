//! Metric sinks the collection loop publishes into.
//!
//! A [`MetricSink`] is process-lifetime state constructed once at startup and
//! shared by reference between the collection loop and the exposition path.
//! Both kinds of metric are published with *set* semantics: gauges take the
//! latest reading, counters take the latest cumulative total reported by the
//! kernel instead of accumulating readings on top of each other.
//!
//! Series of label sets that stop being reported by discovery are removed
//! after [`STALE_AFTER_CYCLES`] consecutive cycles without a sighting.
//!
//! - [`PrometheusSinks`]: Backed by a `prometheus` registry, served on `/metrics`.
//! - [`MemorySinks`]: In-memory map of the last published values.
mod memory;
mod registry;

use std::collections::HashSet;

use dashmap::DashMap;

pub use memory::MemorySinks;
pub use registry::PrometheusSinks;

use crate::catalog::{MetricKind, MetricSpec};
use crate::sandbox::Sandbox;

/// Label names attached to every per-sandbox series.
pub const LABEL_NAMES: [&str; 3] = ["container", "namespace", "pod"];

/// Number of successful discoveries a label set may be missing from before its
/// series are removed.
pub const STALE_AFTER_CYCLES: u32 = 3;

/// Owned label values of one sandbox, in the order of [`LABEL_NAMES`].
pub type LabelSet = [String; 3];

fn label_set(sandbox: &Sandbox) -> LabelSet {
    sandbox.label_values().map(str::to_owned)
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("metric `{0}` is not registered")]
    UnknownMetric(&'static str),

    #[error("metric `{name}` is registered as {registered}, but was published as {published}")]
    KindMismatch {
        name: &'static str,
        registered: MetricKind,
        published: MetricKind,
    },

    #[error("negative value {value} for counter `{name}`")]
    NegativeCounter { name: &'static str, value: i64 },

    #[error("failed to register metric: {0}")]
    Register(#[from] prometheus::Error),
}

/// Destination for values read from cgroup files.
///
/// Implementations must tolerate concurrent reads while a value is published;
/// a reader observes either the previous or the new value of a series.
pub trait MetricSink: Send + Sync {
    /// Publishes `value` for `spec` under the labels of `sandbox`.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the metric is unknown to the sink or the value
    /// is not valid for its kind.
    fn publish(&self, spec: &MetricSpec, sandbox: &Sandbox, value: i64) -> Result<(), SinkError>;

    /// Records a timer tick skipped because the previous cycle was still running.
    fn record_missed_tick(&self) {}

    /// Ages the label sets that are not among `present` and removes the
    /// series of those missing for [`STALE_AFTER_CYCLES`] cycles.
    ///
    /// Returns the number of label sets removed.
    fn forget_absent(&self, _present: &[Sandbox]) -> usize {
        0
    }
}

/// Counts, per label set, the consecutive cycles it was missing from discovery.
#[derive(Debug, Default)]
struct Liveness {
    misses: DashMap<LabelSet, u32>,
}

impl Liveness {
    fn seen(&self, labels: &LabelSet) {
        if !self.misses.contains_key(labels) {
            self.misses.insert(labels.clone(), 0);
        }
    }

    /// Returns the label sets that just went stale and stops tracking them.
    fn sweep(&self, present: &[Sandbox]) -> Vec<LabelSet> {
        let present: HashSet<[&str; 3]> = present.iter().map(Sandbox::label_values).collect();
        let mut expired = Vec::new();
        self.misses.retain(|labels, misses| {
            let key = [labels[0].as_str(), labels[1].as_str(), labels[2].as_str()];
            if present.contains(&key) {
                *misses = 0;
                return true;
            }
            *misses += 1;
            if *misses < STALE_AFTER_CYCLES {
                return true;
            }
            expired.push(labels.clone());
            false
        });
        expired
    }
}
