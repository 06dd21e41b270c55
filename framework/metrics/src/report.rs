use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::store::{MetricSnapshot, MetricSummary};
use crate::threshold::ThresholdVerdict;

/// The final aggregate of a test run: per-metric summaries plus per-threshold verdicts.
///
/// Checks are diagnostic and thresholds are gating, so a run with failed checks still passes
/// as long as every threshold held and every scenario got through setup.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub scenarios: Vec<String>,
    pub duration_s: f64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub thresholds: Vec<ThresholdVerdict>,
    /// Scenarios where setup failed for every VU, producing zero iterations.
    pub setup_failures: Vec<String>,
    /// True when a threshold marked abort-on-fail stopped the run early.
    pub aborted_by_threshold: bool,
}

impl RunReport {
    pub fn new(
        scenarios: Vec<String>,
        duration_s: f64,
        snapshot: MetricSnapshot,
        thresholds: Vec<ThresholdVerdict>,
        setup_failures: Vec<String>,
        aborted_by_threshold: bool,
    ) -> Self {
        Self {
            scenarios,
            duration_s,
            metrics: snapshot
                .into_iter()
                .map(|(key, summary)| (key.to_string(), summary))
                .collect(),
            thresholds,
            setup_failures,
            aborted_by_threshold,
        }
    }

    pub fn passed(&self) -> bool {
        self.setup_failures.is_empty() && self.thresholds.iter().all(|t| t.passed)
    }

    pub fn fail_reason(&self) -> Option<String> {
        if let Some(scenario) = self.setup_failures.first() {
            return Some(format!("setup failed for scenario '{scenario}'"));
        }
        self.thresholds.iter().find(|t| !t.passed).map(|t| {
            format!(
                "threshold '{}' on {} breached (observed {})",
                t.expression,
                t.metric,
                t.observed.map_or_else(|| "n/a".to_string(), fmt2)
            )
        })
    }

    /// Print the metric and threshold tables to stdout.
    pub fn print_summary(&self) {
        println!(
            "\nRan {} for {:.1}s",
            self.scenarios.join(", "),
            self.duration_s
        );

        let metric_rows: Vec<MetricRow> = self
            .metrics
            .iter()
            .map(|(name, summary)| MetricRow::new(name, summary))
            .collect();
        let mut metrics_table = Table::new(&metric_rows);
        metrics_table.with(Style::modern());
        println!("{metrics_table}");

        if !self.thresholds.is_empty() {
            let threshold_rows: Vec<ThresholdRow> =
                self.thresholds.iter().map(ThresholdRow::new).collect();
            let mut thresholds_table = Table::new(&threshold_rows);
            thresholds_table.with(Style::modern());
            println!("{thresholds_table}");
        }

        match self.fail_reason() {
            None => println!("Run verdict: PASSED"),
            Some(reason) => println!("Run verdict: FAILED ({reason})"),
        }
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[derive(Tabled)]
struct MetricRow {
    metric: String,
    kind: &'static str,
    count: String,
    value: String,
    min: String,
    max: String,
    p95: String,
    p99: String,
}

impl MetricRow {
    fn new(name: &str, summary: &MetricSummary) -> Self {
        match summary {
            MetricSummary::Trend {
                count,
                avg_ms,
                min_ms,
                max_ms,
                p95_ms,
                p99_ms,
                ..
            } => Self {
                metric: name.to_string(),
                kind: "trend",
                count: count.to_string(),
                value: format!("avg={}ms", fmt2(*avg_ms)),
                min: format!("{}ms", fmt2(*min_ms)),
                max: format!("{}ms", fmt2(*max_ms)),
                p95: format!("{}ms", fmt2(*p95_ms)),
                p99: format!("{}ms", fmt2(*p99_ms)),
            },
            MetricSummary::Rate { trues, total, rate } => Self {
                metric: name.to_string(),
                kind: "rate",
                count: total.to_string(),
                value: format!("{:.2}% ({trues}/{total})", rate * 100.0),
                min: "-".to_string(),
                max: "-".to_string(),
                p95: "-".to_string(),
                p99: "-".to_string(),
            },
            MetricSummary::Counter { total } => Self {
                metric: name.to_string(),
                kind: "counter",
                count: total.to_string(),
                value: total.to_string(),
                min: "-".to_string(),
                max: "-".to_string(),
                p95: "-".to_string(),
                p99: "-".to_string(),
            },
        }
    }
}

#[derive(Tabled)]
struct ThresholdRow {
    metric: String,
    threshold: String,
    observed: String,
    result: &'static str,
}

impl ThresholdRow {
    fn new(verdict: &ThresholdVerdict) -> Self {
        Self {
            metric: verdict.metric.clone(),
            threshold: verdict.expression.clone(),
            observed: verdict.observed.map_or_else(|| "-".to_string(), fmt2),
            result: if verdict.passed { "pass" } else { "FAIL" },
        }
    }
}

fn fmt2(n: f64) -> String {
    format!("{n:.2}")
}

#[cfg(test)]
mod tests {
    use crate::store::MetricStore;
    use crate::threshold::Threshold;

    use super::*;

    fn sample_report() -> RunReport {
        let store = MetricStore::new();
        store.trend("request_duration", Some("auth"), 150.0);
        store.rate("request_failed", Some("auth"), false);
        store.counter("iterations", Some("auth"), 1);

        let snapshot = store.snapshot();
        let verdicts = vec![
            Threshold::parse("request_duration", "p(95)<200")
                .unwrap()
                .evaluate(&snapshot),
        ];

        RunReport::new(
            vec!["auth".to_string()],
            30.0,
            snapshot,
            verdicts,
            vec![],
            false,
        )
    }

    #[test]
    fn passing_report_has_no_fail_reason() {
        let report = sample_report();
        assert!(report.passed());
        assert_eq!(report.fail_reason(), None);
    }

    #[test]
    fn setup_failure_beats_threshold_breach_as_reason() {
        let mut report = sample_report();
        report.setup_failures.push("auth".to_string());
        report.thresholds[0].passed = false;

        assert!(!report.passed());
        assert!(report.fail_reason().unwrap().contains("setup failed"));
    }

    #[test]
    fn breached_threshold_fails_report() {
        let mut report = sample_report();
        report.thresholds[0].passed = false;
        report.thresholds[0].observed = Some(310.0);

        assert!(!report.passed());
        let reason = report.fail_reason().unwrap();
        assert!(reason.contains("310.00"), "reason: {reason}");
    }

    #[test]
    fn serialises_to_json() {
        let report = sample_report();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["scenarios"][0], "auth");
        assert!(json["metrics"]["request_duration"].is_object());
        assert!(json["metrics"]["request_duration{scenario:auth}"].is_object());
        assert_eq!(json["thresholds"][0]["passed"], true);
    }
}
