use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::catalog::{MetricKind, MetricSpec};
use crate::sandbox::Sandbox;

use super::{LabelSet, Liveness, MetricSink, SinkError, label_set};

/// Identifies one labelled series: metric name plus container, namespace and pod.
type SeriesKey = (String, LabelSet);

/// Keeps the last published value of every series in memory.
///
/// Applies the same set semantics as [`super::PrometheusSinks`] without any
/// exposition. Useful to run the collection loop in isolation.
#[derive(Debug, Default)]
pub struct MemorySinks {
    values: DashMap<SeriesKey, (MetricKind, i64)>,
    missed_ticks: AtomicU64,
    liveness: Liveness,
}

impl MemorySinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last value published for `name` under the labels of `sandbox`.
    pub fn get(&self, name: &str, sandbox: &Sandbox) -> Option<i64> {
        self.values
            .get(&(name.to_owned(), label_set(sandbox)))
            .map(|entry| entry.value().1)
    }

    /// Number of series that received at least one value.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted copy of all series, for comparing the state after two cycles.
    pub fn snapshot(&self) -> Vec<(String, [String; 3], i64)> {
        let mut out: Vec<_> = self
            .values
            .iter()
            .map(|entry| {
                let (name, labels) = entry.key();
                (name.clone(), labels.clone(), entry.value().1)
            })
            .collect();
        out.sort();
        out
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks.load(Ordering::Relaxed)
    }
}

impl MetricSink for MemorySinks {
    fn publish(&self, spec: &MetricSpec, sandbox: &Sandbox, value: i64) -> Result<(), SinkError> {
        if spec.kind == MetricKind::Counter && value < 0 {
            return Err(SinkError::NegativeCounter {
                name: spec.name,
                value,
            });
        }

        let labels = label_set(sandbox);
        {
            let mut entry = self
                .values
                .entry((spec.name.to_owned(), labels.clone()))
                .or_insert((spec.kind, value));
            let (registered, current) = entry.value_mut();
            if *registered != spec.kind {
                return Err(SinkError::KindMismatch {
                    name: spec.name,
                    registered: *registered,
                    published: spec.kind,
                });
            }
            *current = value;
        }
        self.liveness.seen(&labels);
        Ok(())
    }

    fn record_missed_tick(&self) {
        self.missed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    fn forget_absent(&self, present: &[Sandbox]) -> usize {
        let expired = self.liveness.sweep(present);
        if !expired.is_empty() {
            self.values.retain(|(_, labels), _| !expired.contains(labels));
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxId;

    const GAUGE: MetricSpec = MetricSpec::gauge("mem", "", "memory.current", None);
    const COUNTER: MetricSpec = MetricSpec::counter("cpu", "", "cpu.stat", Some("usage_usec"));

    fn sandbox(container: &str) -> Sandbox {
        Sandbox::standalone(SandboxId::new(format!("id-{container}")).unwrap(), container)
    }

    #[test]
    fn test_values_are_set_not_accumulated() {
        let sinks = MemorySinks::new();
        sinks.publish(&GAUGE, &sandbox("a"), 10).unwrap();
        sinks.publish(&GAUGE, &sandbox("a"), 7).unwrap();
        sinks.publish(&COUNTER, &sandbox("a"), 100).unwrap();
        sinks.publish(&COUNTER, &sandbox("a"), 150).unwrap();

        assert_eq!(sinks.get("mem", &sandbox("a")), Some(7));
        assert_eq!(sinks.get("cpu", &sandbox("a")), Some(150));
        assert_eq!(sinks.len(), 2);
    }

    #[test]
    fn test_series_are_separated_by_labels() {
        let sinks = MemorySinks::new();
        sinks.publish(&GAUGE, &sandbox("a"), 1).unwrap();
        sinks.publish(&GAUGE, &sandbox("b"), 2).unwrap();

        assert_eq!(sinks.get("mem", &sandbox("a")), Some(1));
        assert_eq!(sinks.get("mem", &sandbox("b")), Some(2));
        assert_eq!(sinks.get("mem", &sandbox("c")), None);
    }

    #[test]
    fn test_rejects_negative_counter_and_kind_change() {
        let sinks = MemorySinks::new();
        assert!(sinks.publish(&COUNTER, &sandbox("a"), -5).is_err());
        assert!(sinks.is_empty());

        sinks.publish(&GAUGE, &sandbox("a"), 1).unwrap();
        let as_counter = MetricSpec::counter("mem", "", "memory.current", None);
        assert!(matches!(
            sinks.publish(&as_counter, &sandbox("a"), 2),
            Err(SinkError::KindMismatch { .. })
        ));
        assert_eq!(sinks.get("mem", &sandbox("a")), Some(1));
    }

    #[test]
    fn test_forget_absent_removes_all_metrics_of_stale_labels() {
        let sinks = MemorySinks::new();
        for name in ["a", "b"] {
            sinks.publish(&GAUGE, &sandbox(name), 1).unwrap();
            sinks.publish(&COUNTER, &sandbox(name), 2).unwrap();
        }

        for _ in 1..crate::sink::STALE_AFTER_CYCLES {
            assert_eq!(sinks.forget_absent(&[sandbox("a")]), 0);
        }
        assert_eq!(sinks.len(), 4);
        assert_eq!(sinks.forget_absent(&[sandbox("a")]), 1);

        assert_eq!(sinks.len(), 2);
        assert_eq!(sinks.get("cpu", &sandbox("a")), Some(2));
        assert_eq!(sinks.get("cpu", &sandbox("b")), None);
    }
}
