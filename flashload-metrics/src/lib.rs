pub mod agg;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod sample;
pub mod tags;

pub use agg::{MetricSnapshot, Query};
pub use error::{Error, Result};
pub use metrics::{
    MetricHandle, MetricKind, MetricSeriesSummary, MetricValue, RateSnapshot, TrendSnapshot,
    TrendSummary, percentile_of_sorted,
};
pub use registry::{MetricId, Registry};
pub use sample::{MetricSample, SampleValue};
pub use tags::TagSet;
