use std::sync::Arc;
use std::time::Instant;

use crate::metrics::MetricKind;
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Counter(u64),
    Rate(bool),
    Trend(f64),
}

impl SampleValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            SampleValue::Counter(_) => MetricKind::Counter,
            SampleValue::Rate(_) => MetricKind::Rate,
            SampleValue::Trend(_) => MetricKind::Trend,
        }
    }
}

/// One immutable observation, consumed once by [`crate::Registry::push`].
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub name: Arc<str>,
    pub tags: TagSet,
    pub value: SampleValue,
    pub timestamp: Instant,
}

impl MetricSample {
    pub fn new(name: impl Into<Arc<str>>, value: SampleValue) -> Self {
        Self {
            name: name.into(),
            tags: TagSet::default(),
            value,
            timestamp: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}
