use serde::Serialize;

use crate::store::{MetricKey, MetricSnapshot, MetricSummary};

/// The statistic a threshold compares against its bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Stat {
    /// Quantile of a trend, in [0, 100]. `med` parses to `Percentile(50.0)`.
    Percentile(f64),
    Rate,
    Avg,
    Min,
    Max,
    Count,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThresholdParseError {
    #[error("empty threshold expression")]
    Empty,
    #[error("unknown statistic in '{0}'")]
    UnknownStat(String),
    #[error("missing comparator in '{0}'")]
    MissingComparator(String),
    #[error("invalid bound in '{0}'")]
    InvalidBound(String),
    #[error("invalid metric selector '{0}'")]
    InvalidSelector(String),
}

/// A gating statistical condition on one metric, e.g. `p(95)<300` on `request_duration`.
///
/// Thresholds are parsed from the same compact expressions the original load suite used:
/// `p(N)`, `med`, `rate`, `avg`, `min`, `max` and `count`, compared with `<`, `<=`, `>` or
/// `>=` against a numeric bound. The metric selector may carry a scenario scope, as in
/// `request_duration{scenario:grpc_health}`.
#[derive(Clone, Debug)]
pub struct Threshold {
    key: MetricKey,
    stat: Stat,
    comparator: Comparator,
    bound: f64,
    abort_on_fail: bool,
    expression: String,
}

impl Threshold {
    pub fn parse(selector: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ThresholdParseError::Empty);
        }

        let key = parse_selector(selector)?;

        let (comparator, split_at, op_len) = find_comparator(expression)
            .ok_or_else(|| ThresholdParseError::MissingComparator(expression.to_string()))?;

        let stat = parse_stat(expression[..split_at].trim())
            .ok_or_else(|| ThresholdParseError::UnknownStat(expression.to_string()))?;

        let bound = expression[split_at + op_len..]
            .trim()
            .parse::<f64>()
            .map_err(|_| ThresholdParseError::InvalidBound(expression.to_string()))?;

        Ok(Self {
            key,
            stat,
            comparator,
            bound,
            abort_on_fail: false,
            expression: expression.to_string(),
        })
    }

    /// Breaching this threshold aborts the whole run instead of only failing it at the end.
    pub fn abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }

    /// Scope an unscoped selector to one scenario. Selectors that already carry a scope are
    /// left alone.
    pub fn scope_to(mut self, scenario: &str) -> Self {
        if self.key.scenario.is_none() {
            self.key.scenario = Some(scenario.to_string());
        }
        self
    }

    pub fn aborts_run(&self) -> bool {
        self.abort_on_fail
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    /// Evaluate against a snapshot. A metric that has recorded no samples passes: an absent
    /// statistic is not evidence of a breach.
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> ThresholdVerdict {
        let observed = snapshot.get(&self.key).and_then(|m| observe(m, self.stat));
        let passed = match observed {
            Some(value) => self.comparator.holds(value, self.bound),
            None => true,
        };

        ThresholdVerdict {
            metric: self.key.to_string(),
            expression: self.expression.clone(),
            observed,
            passed,
            abort_on_fail: self.abort_on_fail,
        }
    }
}

/// The outcome of evaluating one threshold: pass/fail plus the observed statistic.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdVerdict {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
    pub abort_on_fail: bool,
}

fn parse_selector(selector: &str) -> Result<MetricKey, ThresholdParseError> {
    let selector = selector.trim();
    match selector.split_once('{') {
        None if !selector.is_empty() => Ok(MetricKey::global(selector)),
        Some((name, rest)) => {
            let scope = rest
                .strip_suffix('}')
                .and_then(|s| s.strip_prefix("scenario:"))
                .ok_or_else(|| ThresholdParseError::InvalidSelector(selector.to_string()))?;
            if name.is_empty() || scope.is_empty() {
                return Err(ThresholdParseError::InvalidSelector(selector.to_string()));
            }
            Ok(MetricKey::scoped(name, scope))
        }
        None => Err(ThresholdParseError::InvalidSelector(selector.to_string())),
    }
}

fn find_comparator(expression: &str) -> Option<(Comparator, usize, usize)> {
    for (needle, comparator) in [
        ("<=", Comparator::Le),
        (">=", Comparator::Ge),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ] {
        if let Some(at) = expression.find(needle) {
            return Some((comparator, at, needle.len()));
        }
    }
    None
}

fn parse_stat(stat: &str) -> Option<Stat> {
    match stat {
        "rate" => Some(Stat::Rate),
        "avg" => Some(Stat::Avg),
        "min" => Some(Stat::Min),
        "max" => Some(Stat::Max),
        "med" => Some(Stat::Percentile(50.0)),
        "count" => Some(Stat::Count),
        _ => {
            let quantile = stat.strip_prefix("p(")?.strip_suffix(')')?;
            let quantile = quantile.parse::<f64>().ok()?;
            // Snapshots pre-compute the standard quantiles; only those can be gated on.
            [50.0, 90.0, 95.0, 99.0]
                .contains(&quantile)
                .then_some(Stat::Percentile(quantile))
        }
    }
}

fn observe(summary: &MetricSummary, stat: Stat) -> Option<f64> {
    match (summary, stat) {
        (MetricSummary::Trend { count, .. }, _) if *count == 0 => None,
        (
            MetricSummary::Trend {
                p50_ms,
                p90_ms,
                p95_ms,
                p99_ms,
                ..
            },
            Stat::Percentile(q),
        ) => {
            // Snapshots pre-compute the quantiles thresholds actually use; anything else
            // would need a live query against the sink.
            match q {
                q if (q - 50.0).abs() < f64::EPSILON => Some(*p50_ms),
                q if (q - 90.0).abs() < f64::EPSILON => Some(*p90_ms),
                q if (q - 95.0).abs() < f64::EPSILON => Some(*p95_ms),
                q if (q - 99.0).abs() < f64::EPSILON => Some(*p99_ms),
                _ => None,
            }
        }
        (MetricSummary::Trend { avg_ms, .. }, Stat::Avg) => Some(*avg_ms),
        (MetricSummary::Trend { min_ms, .. }, Stat::Min) => Some(*min_ms),
        (MetricSummary::Trend { max_ms, .. }, Stat::Max) => Some(*max_ms),
        (MetricSummary::Trend { count, .. }, Stat::Count) => Some(*count as f64),
        (MetricSummary::Rate { rate, .. }, Stat::Rate) => Some(*rate),
        (MetricSummary::Rate { total, .. }, Stat::Count) => Some(*total as f64),
        (MetricSummary::Counter { total }, Stat::Count) => Some(*total as f64),
        _ => None,
    }
}
