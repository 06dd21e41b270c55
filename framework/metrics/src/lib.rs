pub mod names;
mod report;
mod store;
mod threshold;
mod trend;

pub mod prelude {
    pub use crate::names;
    pub use crate::report::RunReport;
    pub use crate::store::{MetricKey, MetricSnapshot, MetricStore, MetricSummary};
    pub use crate::threshold::{Stat, Threshold, ThresholdParseError, ThresholdVerdict};
    pub use crate::trend::{HdrTrend, TrendSink};
}
