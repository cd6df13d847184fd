use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as a {existing}, not a {requested}")]
    KindConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("metric `{name}` is a {expected} but the sample is a {got}")]
    SampleKindMismatch {
        name: String,
        expected: MetricKind,
        got: MetricKind,
    },

    #[error("trend sample for `{0}` is not a finite number")]
    NonFiniteSample(String),
}
