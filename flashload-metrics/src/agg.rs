use std::sync::atomic::Ordering;

use crate::metrics::{
    MetricHandle, MetricKind, MetricStorage, MetricValue, RateSnapshot, TrendSnapshot,
};
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;

/// Folded view of one or more series of a metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricSnapshot {
    Counter(u64),
    Rate(RateSnapshot),
    Trend(TrendSnapshot),
}

impl MetricSnapshot {
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricSnapshot::Counter(0),
            MetricKind::Rate => MetricSnapshot::Rate(RateSnapshot::default()),
            MetricKind::Trend => MetricSnapshot::Trend(TrendSnapshot::default()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSnapshot::Counter(_) => MetricKind::Counter,
            MetricSnapshot::Rate(_) => MetricKind::Rate,
            MetricSnapshot::Trend(_) => MetricKind::Trend,
        }
    }

    pub(crate) fn from_handle(handle: &MetricHandle) -> Self {
        match handle {
            MetricHandle::Counter(_) => MetricSnapshot::Counter(handle.counter()),
            MetricHandle::Rate(_) => MetricSnapshot::Rate(handle.rate()),
            MetricHandle::Trend(_) => MetricSnapshot::Trend(handle.trend()),
        }
    }

    fn from_storage(storage: &MetricStorage) -> Self {
        match storage {
            MetricStorage::Counter(c) => MetricSnapshot::Counter(c.load(Ordering::Relaxed)),
            other => Self::from_handle(&other.handle()),
        }
    }

    fn merge(self, other: MetricSnapshot) -> MetricSnapshot {
        match (self, other) {
            (MetricSnapshot::Counter(a), MetricSnapshot::Counter(b)) => {
                MetricSnapshot::Counter(a.saturating_add(b))
            }
            (MetricSnapshot::Rate(mut a), MetricSnapshot::Rate(b)) => {
                a.merge(b);
                MetricSnapshot::Rate(a)
            }
            (MetricSnapshot::Trend(a), MetricSnapshot::Trend(b)) => {
                MetricSnapshot::Trend(a.merge(b))
            }
            // Series of one metric always share a kind.
            (a, _) => a,
        }
    }

    pub fn value(&self) -> MetricValue {
        match self {
            MetricSnapshot::Counter(v) => MetricValue::Counter(*v),
            MetricSnapshot::Rate(r) => MetricValue::Rate {
                total: r.total,
                trues: r.trues,
                rate: r.rate(),
            },
            MetricSnapshot::Trend(t) => MetricValue::Trend(t.summary()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    selector: TagSet,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId) -> Self {
        Self {
            registry,
            metric,
            selector: TagSet::default(),
        }
    }

    /// Keeps only series carrying every pair of `selector`.
    #[must_use]
    pub fn matching(mut self, selector: TagSet) -> Self {
        self.selector = selector;
        self
    }

    /// Folds every matching series. `None` when the metric is not registered; a registered
    /// metric without matching series yields an empty snapshot of its kind.
    pub fn snapshot(self) -> Option<MetricSnapshot> {
        let kind = self.registry.kind_of(self.metric)?;
        let mut acc = MetricSnapshot::empty(kind);

        self.registry.visit_series(self.metric, |tags, storage| {
            if !tags.matches(&self.selector) {
                return;
            }
            let snap = MetricSnapshot::from_storage(storage);
            acc = std::mem::replace(&mut acc, MetricSnapshot::Counter(0)).merge(snap);
        });

        Some(acc)
    }
}
