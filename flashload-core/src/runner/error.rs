use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`stages` must be a non-empty array of {{ duration, target }} with a non-zero total")]
    InvalidStages,

    #[error("`userCount` must be a positive integer")]
    InvalidUserCount,

    #[error("`quantity` must be a positive integer")]
    InvalidQuantity,

    #[error("`thinkTime.min` ({min:?}) must not exceed `thinkTime.max` ({max:?})")]
    InvalidThinkTime { min: Duration, max: Duration },

    #[error("`requestTimeout` must be a positive duration")]
    InvalidRequestTimeout,

    #[error("`reconcileInterval` must be a positive duration")]
    InvalidReconcileInterval,

    #[error("`baseUrl` must be an absolute http:// URL: `{0}`")]
    InvalidBaseUrl(String),

    #[error(transparent)]
    Threshold(#[from] crate::thresholds::Error),

    #[error(transparent)]
    Metrics(#[from] flashload_metrics::Error),
}
