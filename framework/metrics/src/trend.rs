use hdrhistogram::Histogram;

/// Streaming statistics sink backing a Trend metric.
///
/// The store does not retain raw samples, so a sink must answer percentile queries from
/// whatever compact representation it keeps. Implementations document their own error bound.
pub trait TrendSink: Send {
    fn insert(&mut self, value_ms: f64);

    /// The value at quantile `p` in [0, 100], in milliseconds.
    fn percentile(&self, p: f64) -> f64;

    fn count(&self) -> u64;
    fn min(&self) -> f64;
    fn max(&self) -> f64;
    fn avg(&self) -> f64;
}

/// The default [TrendSink], backed by an auto-resizing HdrHistogram.
///
/// Samples are recorded as whole microseconds at three significant figures, so any reported
/// percentile is within 0.1% of the true value for latencies of 1µs and above. Memory use is
/// bounded by the histogram's bucket count, not by the number of samples, which keeps long
/// soak runs flat.
pub struct HdrTrend {
    hist: Histogram<u64>,
}

impl Default for HdrTrend {
    fn default() -> Self {
        Self {
            hist: Histogram::new(3).expect("3 significant figures is a valid histogram config"),
        }
    }
}

impl TrendSink for HdrTrend {
    fn insert(&mut self, value_ms: f64) {
        let micros = (value_ms * 1_000.0).round().max(0.0) as u64;
        self.hist.saturating_record(micros);
    }

    fn percentile(&self, p: f64) -> f64 {
        self.hist.value_at_quantile(p / 100.0) as f64 / 1_000.0
    }

    fn count(&self) -> u64 {
        self.hist.len()
    }

    fn min(&self) -> f64 {
        if self.hist.is_empty() {
            return 0.0;
        }
        self.hist.min() as f64 / 1_000.0
    }

    fn max(&self) -> f64 {
        self.hist.max() as f64 / 1_000.0
    }

    fn avg(&self) -> f64 {
        self.hist.mean() / 1_000.0
    }
}
