//! Metrics for a deployed instance.

mod range;
mod report;

pub use range::MetricsRange;
pub use report::{build_series, collect, queries, MetricSeries, MetricsReport};
