use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::{IntCounter, IntGaugeVec, Opts, Registry};

use crate::catalog::{MetricKind, MetricSpec};
use crate::sandbox::Sandbox;

use super::{LABEL_NAMES, LabelSet, Liveness, MetricSink, SinkError, label_set};

/// Counter family whose series are set to a kernel-reported cumulative total.
///
/// Each series is one `AtomicU64`, so an update is a single store and a
/// concurrent scrape sees either the previous or the new total.
#[derive(Clone)]
struct CumulativeCounterVec {
    desc: Desc,
    values: Arc<DashMap<LabelSet, AtomicU64>>,
}

impl CumulativeCounterVec {
    fn new(name: &str, help: &str) -> prometheus::Result<Self> {
        let desc = Desc::new(
            name.to_owned(),
            help.to_owned(),
            LABEL_NAMES.iter().map(|label| label.to_string()).collect(),
            HashMap::new(),
        )?;
        Ok(Self {
            desc,
            values: Arc::default(),
        })
    }

    /// Stores `total` and returns the previous total of the series, if any.
    fn store(&self, labels: LabelSet, total: u64) -> Option<u64> {
        if let Some(current) = self.values.get(&labels) {
            return Some(current.swap(total, Ordering::Relaxed));
        }
        self.values
            .insert(labels, AtomicU64::new(total))
            .map(AtomicU64::into_inner)
    }

    fn remove(&self, labels: &LabelSet) {
        self.values.remove(labels);
    }

    fn metric(labels: &LabelSet, total: u64) -> proto::Metric {
        let mut metric = proto::Metric::default();
        for (name, value) in LABEL_NAMES.iter().zip(labels) {
            let mut pair = proto::LabelPair::default();
            pair.set_name(name.to_string());
            pair.set_value(value.clone());
            metric.mut_label().push(pair);
        }
        let mut counter = proto::Counter::default();
        counter.set_value(total as f64);
        metric.set_counter(counter);
        metric
    }
}

impl Collector for CumulativeCounterVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut family = MetricFamily::default();
        family.set_name(self.desc.fq_name.clone());
        family.set_help(self.desc.help.clone());
        family.set_field_type(MetricType::COUNTER);
        for entry in self.values.iter() {
            let total = entry.value().load(Ordering::Relaxed);
            family.mut_metric().push(Self::metric(entry.key(), total));
        }
        vec![family]
    }
}

#[derive(Clone)]
enum Series {
    Gauge(IntGaugeVec),
    Counter(CumulativeCounterVec),
}

impl Series {
    fn kind(&self) -> MetricKind {
        match self {
            Series::Gauge(_) => MetricKind::Gauge,
            Series::Counter(_) => MetricKind::Counter,
        }
    }

    fn remove(&self, labels: &LabelSet) {
        match self {
            Series::Gauge(vec) => {
                let values = [labels[0].as_str(), labels[1].as_str(), labels[2].as_str()];
                // Err only means the gauge never received a value for these labels.
                let _ = vec.remove_label_values(&values);
            }
            Series::Counter(vec) => vec.remove(labels),
        }
    }
}

/// Metric sinks backed by a private [`prometheus::Registry`].
///
/// One labelled family is registered per catalog entry, plus the exporter's own
/// `cgroup_exporter_missed_ticks_total` counter. Cloning is cheap and shares
/// the underlying series.
#[derive(Clone)]
pub struct PrometheusSinks {
    registry: Registry,
    series: HashMap<&'static str, Series>,
    missed_ticks: IntCounter,
    liveness: Arc<Liveness>,
}

impl PrometheusSinks {
    /// Registers a series for every spec in `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Register`] if a name is invalid or used twice.
    pub fn new(catalog: &[MetricSpec]) -> Result<Self, SinkError> {
        let registry = Registry::new();
        let mut series = HashMap::with_capacity(catalog.len());

        for spec in catalog {
            let entry = match spec.kind {
                MetricKind::Gauge => {
                    let vec = IntGaugeVec::new(Opts::new(spec.name, spec.help), &LABEL_NAMES)?;
                    registry.register(Box::new(vec.clone()))?;
                    Series::Gauge(vec)
                }
                MetricKind::Counter => {
                    let vec = CumulativeCounterVec::new(spec.name, spec.help)?;
                    registry.register(Box::new(vec.clone()))?;
                    Series::Counter(vec)
                }
            };
            series.insert(spec.name, entry);
        }

        let missed_ticks = IntCounter::new(
            "cgroup_exporter_missed_ticks_total",
            "Number of collection ticks skipped because the previous cycle was still running.",
        )?;
        registry.register(Box::new(missed_ticks.clone()))?;

        Ok(Self {
            registry,
            series,
            missed_ticks,
            liveness: Arc::default(),
        })
    }

    /// Snapshot of all metric families for exposition.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    pub fn missed_ticks(&self) -> u64 {
        self.missed_ticks.get()
    }
}

impl std::fmt::Debug for PrometheusSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSinks")
            .field("series", &self.series.keys().collect::<Vec<_>>())
            .field("missed_ticks", &self.missed_ticks.get())
            .finish()
    }
}

impl MetricSink for PrometheusSinks {
    fn publish(&self, spec: &MetricSpec, sandbox: &Sandbox, value: i64) -> Result<(), SinkError> {
        let series = self
            .series
            .get(spec.name)
            .ok_or(SinkError::UnknownMetric(spec.name))?;

        match (spec.kind, series) {
            (MetricKind::Gauge, Series::Gauge(vec)) => {
                vec.with_label_values(&sandbox.label_values()).set(value);
            }
            (MetricKind::Counter, Series::Counter(vec)) => {
                let total = u64::try_from(value).map_err(|_| SinkError::NegativeCounter {
                    name: spec.name,
                    value,
                })?;
                let previous = vec.store(label_set(sandbox), total);
                if previous.is_some_and(|previous| total < previous) {
                    // The kernel total only shrinks when the cgroup was recreated under the same labels.
                    log::debug!(
                        "Counter `{}` for {} went back to {}",
                        spec.name,
                        sandbox,
                        total
                    );
                }
            }
            (published, series) => {
                return Err(SinkError::KindMismatch {
                    name: spec.name,
                    registered: series.kind(),
                    published,
                });
            }
        }

        self.liveness.seen(&label_set(sandbox));
        Ok(())
    }

    fn record_missed_tick(&self) {
        self.missed_ticks.inc();
    }

    fn forget_absent(&self, present: &[Sandbox]) -> usize {
        let expired = self.liveness.sweep(present);
        for labels in &expired {
            log::debug!("Removing stale series of labels {:?}", labels);
            for series in self.series.values() {
                series.remove(labels);
            }
        }
        expired.len()
    }
}
