use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::trend::{HdrTrend, TrendSink};

/// Identifies one collector in the store.
///
/// Every sample is recorded under its plain metric name and, when it was produced by a
/// scenario, additionally under a scenario-scoped key. Thresholds can then target either the
/// run-wide aggregate (`request_duration`) or a single scenario
/// (`request_duration{scenario:grpc_health}`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub scenario: Option<String>,
}

impl MetricKey {
    pub fn global(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scenario: None,
        }
    }

    pub fn scoped(name: &str, scenario: &str) -> Self {
        Self {
            name: name.to_string(),
            scenario: Some(scenario.to_string()),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scenario {
            Some(scenario) => write!(f, "{}{{scenario:{}}}", self.name, scenario),
            None => write!(f, "{}", self.name),
        }
    }
}

enum MetricData {
    Trend(Box<dyn TrendSink>),
    Rate { trues: u64, total: u64 },
    Counter(u64),
}

impl MetricData {
    fn kind(&self) -> &'static str {
        match self {
            MetricData::Trend(_) => "trend",
            MetricData::Rate { .. } => "rate",
            MetricData::Counter(_) => "counter",
        }
    }
}

/// Point-in-time summary of one metric. Building a summary never mutates the collector, so
/// threshold evaluation can run concurrently with traffic generation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSummary {
    Trend {
        count: u64,
        avg_ms: f64,
        min_ms: f64,
        max_ms: f64,
        p50_ms: f64,
        p90_ms: f64,
        p95_ms: f64,
        p99_ms: f64,
    },
    Rate {
        trues: u64,
        total: u64,
        rate: f64,
    },
    Counter {
        total: u64,
    },
}

pub type MetricSnapshot = BTreeMap<MetricKey, MetricSummary>;

/// Append-only concurrent collectors for latency distributions, boolean rates and counts.
///
/// The store is the only structure mutated concurrently by all virtual users. Appends take a
/// read lock on the metric map plus a per-metric mutex, so VUs recording different metrics do
/// not contend with each other. Aggregation is commutative and no ordering across VUs is
/// assumed or preserved.
pub struct MetricStore {
    metrics: RwLock<HashMap<MetricKey, Arc<Mutex<MetricData>>>>,
    trend_factory: Box<dyn Fn() -> Box<dyn TrendSink> + Send + Sync>,
}

impl fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricStore").finish_non_exhaustive()
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    pub fn new() -> Self {
        Self::with_trend_sink(|| Box::<HdrTrend>::default())
    }

    /// Swap out the streaming statistics structure backing Trend metrics.
    pub fn with_trend_sink(
        factory: impl Fn() -> Box<dyn TrendSink> + Send + Sync + 'static,
    ) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            trend_factory: Box::new(factory),
        }
    }

    /// Record one latency sample, in milliseconds.
    pub fn trend(&self, name: &str, scenario: Option<&str>, value_ms: f64) {
        self.record(
            name,
            scenario,
            |store| MetricData::Trend((store.trend_factory)()),
            |data| match data {
                MetricData::Trend(sink) => sink.insert(value_ms),
                other => log::warn!("Metric {name} is a {}, not a trend", other.kind()),
            },
        );
    }

    /// Record one boolean sample for a rate metric.
    pub fn rate(&self, name: &str, scenario: Option<&str>, hit: bool) {
        self.record(
            name,
            scenario,
            |_| MetricData::Rate { trues: 0, total: 0 },
            |data| match data {
                MetricData::Rate { trues, total } => {
                    *total += 1;
                    if hit {
                        *trues += 1;
                    }
                }
                other => log::warn!("Metric {name} is a {}, not a rate", other.kind()),
            },
        );
    }

    /// Add to a monotonic counter.
    pub fn counter(&self, name: &str, scenario: Option<&str>, by: u64) {
        self.record(
            name,
            scenario,
            |_| MetricData::Counter(0),
            |data| match data {
                MetricData::Counter(total) => *total += by,
                other => log::warn!("Metric {name} is a {}, not a counter", other.kind()),
            },
        );
    }

    fn record(
        &self,
        name: &str,
        scenario: Option<&str>,
        init: impl Fn(&Self) -> MetricData,
        mut apply: impl FnMut(&mut MetricData),
    ) {
        let keys = std::iter::once(MetricKey::global(name))
            .chain(scenario.map(|s| MetricKey::scoped(name, s)));

        for key in keys {
            let metric = self.metric_for(key, &init);
            apply(&mut metric.lock());
        }
    }

    fn metric_for(
        &self,
        key: MetricKey,
        init: &impl Fn(&Self) -> MetricData,
    ) -> Arc<Mutex<MetricData>> {
        if let Some(metric) = self.metrics.read().get(&key) {
            return metric.clone();
        }

        self.metrics
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(init(self))))
            .clone()
    }

    fn summarise(data: &MetricData) -> MetricSummary {
        match data {
            MetricData::Trend(sink) => MetricSummary::Trend {
                count: sink.count(),
                avg_ms: sink.avg(),
                min_ms: sink.min(),
                max_ms: sink.max(),
                p50_ms: sink.percentile(50.0),
                p90_ms: sink.percentile(90.0),
                p95_ms: sink.percentile(95.0),
                p99_ms: sink.percentile(99.0),
            },
            MetricData::Rate { trues, total } => MetricSummary::Rate {
                trues: *trues,
                total: *total,
                rate: if *total == 0 {
                    0.0
                } else {
                    *trues as f64 / *total as f64
                },
            },
            MetricData::Counter(total) => MetricSummary::Counter { total: *total },
        }
    }

    /// Summarise every metric without mutating any collector.
    pub fn snapshot(&self) -> MetricSnapshot {
        self.metrics
            .read()
            .iter()
            .map(|(key, data)| (key.clone(), Self::summarise(&data.lock())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn rate_is_ratio_of_true_samples() {
        let store = MetricStore::new();
        for _ in 0..3 {
            store.rate("errors", None, true);
        }
        for _ in 0..7 {
            store.rate("errors", None, false);
        }

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.get(&MetricKey::global("errors")),
            Some(&MetricSummary::Rate {
                trues: 3,
                total: 10,
                rate: 0.3
            })
        );
    }

    #[test]
    fn counter_accumulates() {
        let store = MetricStore::new();
        store.counter("iterations", None, 2);
        store.counter("iterations", None, 5);

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.get(&MetricKey::global("iterations")),
            Some(&MetricSummary::Counter { total: 7 })
        );
    }

    #[test]
    fn scenario_samples_record_scoped_and_global() {
        let store = MetricStore::new();
        store.trend("request_duration", Some("auth"), 120.0);
        store.trend("request_duration", Some("gateway"), 80.0);

        let snapshot = store.snapshot();
        let global = snapshot
            .get(&MetricKey::global("request_duration"))
            .unwrap();
        let scoped = snapshot
            .get(&MetricKey::scoped("request_duration", "auth"))
            .unwrap();

        match global {
            MetricSummary::Trend { count, .. } => assert_eq!(*count, 2),
            other => panic!("expected trend, got {other:?}"),
        }
        match scoped {
            MetricSummary::Trend { count, max_ms, .. } => {
                assert_eq!(*count, 1);
                assert!((max_ms - 120.0).abs() < 0.2);
            }
            other => panic!("expected trend, got {other:?}"),
        }
    }

    #[test]
    fn snapshot_does_not_drain_collectors() {
        let store = MetricStore::new();
        store.rate("errors", None, true);

        let first = store.snapshot();
        let second = store.snapshot();
        assert_eq!(first, second);
    }

    #[test]
    fn kind_mismatch_is_ignored() {
        let store = MetricStore::new();
        store.counter("iterations", None, 1);
        store.trend("iterations", None, 5.0);

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.get(&MetricKey::global("iterations")),
            Some(&MetricSummary::Counter { total: 1 })
        );
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let store = Arc::new(MetricStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.counter("iterations", None, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.get(&MetricKey::global("iterations")),
            Some(&MetricSummary::Counter { total: 8000 })
        );
    }

    #[test]
    fn metric_key_display() {
        assert_eq!(MetricKey::global("checks").to_string(), "checks");
        assert_eq!(
            MetricKey::scoped("checks", "auth").to_string(),
            "checks{scenario:auth}"
        );
    }
}
