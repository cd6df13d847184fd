use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::agg::{MetricSnapshot, Query};
use crate::error::{Error, Result};
use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, MetricStorage};
use crate::sample::{MetricSample, SampleValue};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(u32);

#[derive(Debug)]
pub struct MetricDef {
    pub name: Arc<str>,
    pub kind: MetricKind,
}

type SeriesMap = DashMap<TagSet, MetricStorage, RandomState>;

#[derive(Debug, Default)]
pub struct Registry {
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, SeriesMap, RandomState>,
}

impl Registry {
    /// Registers `name` or returns the id it already has. Re-registering under a different
    /// kind is an error.
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs
            .iter()
            .enumerate()
            .find(|(_, d)| d.name.as_ref() == name)
        {
            if def.kind != kind {
                return Err(Error::KindConflict {
                    name: name.to_string(),
                    existing: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: Arc::from(name),
            kind,
        });
        self.storage.insert(id, SeriesMap::default());
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let defs = self.defs.read();
        defs.iter()
            .enumerate()
            .find(|(_, d)| d.name.as_ref() == name)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn kind_of(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    /// Write handle for one series, created on first use.
    pub fn get_handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        // Read the kind before touching storage; `register` takes the locks in the other order.
        let kind = self.kind_of(metric)?;
        let series_map = self.storage.get(&metric)?;

        if let Some(storage) = series_map.get(&tags) {
            return Some(storage.handle());
        }

        let storage = series_map
            .entry(tags)
            .or_insert_with(|| MetricStorage::new(kind));
        Some(storage.handle())
    }

    /// Applies one sample to the series named by it.
    pub fn push(&self, sample: MetricSample) -> Result<()> {
        let (metric, kind) = self
            .lookup(&sample.name)
            .ok_or_else(|| Error::UnknownMetric(sample.name.to_string()))?;

        if kind != sample.kind() {
            return Err(Error::SampleKindMismatch {
                name: sample.name.to_string(),
                expected: kind,
                got: sample.kind(),
            });
        }

        let handle = self
            .get_handle(metric, sample.tags)
            .ok_or_else(|| Error::UnknownMetric(sample.name.to_string()))?;

        match sample.value {
            SampleValue::Counter(delta) => handle.add_counter(delta),
            SampleValue::Rate(v) => handle.add_rate(v),
            SampleValue::Trend(v) => {
                if !v.is_finite() {
                    return Err(Error::NonFiniteSample(sample.name.to_string()));
                }
                handle.add_trend(v);
            }
        }
        Ok(())
    }

    pub fn query(&self, metric: MetricId) -> Query<'_> {
        Query::new(self, metric)
    }

    /// All series of `name` folded together.
    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        let (metric, _) = self.lookup(name)?;
        self.query(metric).snapshot()
    }

    pub(crate) fn visit_series(
        &self,
        metric: MetricId,
        mut f: impl FnMut(&TagSet, &MetricStorage),
    ) {
        let Some(series_map) = self.storage.get(&metric) else {
            return;
        };
        for series in series_map.iter() {
            f(series.key(), series.value());
        }
    }

    pub fn metric_names(&self) -> Vec<(Arc<str>, MetricKind)> {
        self.defs
            .read()
            .iter()
            .map(|d| (d.name.clone(), d.kind))
            .collect()
    }

    /// One entry per series, sorted by metric name then tags.
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let mut out = Vec::new();
        let defs: Vec<(MetricId, Arc<str>, MetricKind)> = self
            .defs
            .read()
            .iter()
            .enumerate()
            .map(|(idx, d)| (MetricId(idx as u32), d.name.clone(), d.kind))
            .collect();

        for (metric, name, kind) in defs {
            let mut series: Vec<(TagSet, MetricHandle)> = Vec::new();
            self.visit_series(metric, |tags, storage| {
                series.push((tags.clone(), storage.handle()));
            });
            series.sort_by(|a, b| a.0.cmp(&b.0));

            for (tags, handle) in series {
                out.push(MetricSeriesSummary {
                    name: name.to_string(),
                    kind,
                    tags: tags.to_pairs(),
                    values: MetricSnapshot::from_handle(&handle).value(),
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    #[test]
    fn register_is_idempotent_for_same_kind() {
        let reg = Registry::default();
        let a = reg
            .register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = reg
            .register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);
        assert_eq!(reg.lookup("errors"), Some((a, MetricKind::Rate)));
    }

    #[test]
    fn register_rejects_kind_conflict() {
        let reg = Registry::default();
        reg.register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));
        let err = reg.register("errors", MetricKind::Counter);
        assert!(matches!(err, Err(Error::KindConflict { .. })));
    }

    #[test]
    fn push_routes_samples_by_name() {
        let reg = Registry::default();
        reg.register("stock_exhausted", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        reg.register("complete_purchase_time", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));

        reg.push(MetricSample::new("stock_exhausted", SampleValue::Counter(1)))
            .unwrap_or_else(|e| panic!("{e}"));
        reg.push(MetricSample::new("stock_exhausted", SampleValue::Counter(2)))
            .unwrap_or_else(|e| panic!("{e}"));
        reg.push(MetricSample::new(
            "complete_purchase_time",
            SampleValue::Trend(12.5),
        ))
        .unwrap_or_else(|e| panic!("{e}"));

        let Some(MetricSnapshot::Counter(total)) = reg.snapshot("stock_exhausted") else {
            panic!("expected counter snapshot");
        };
        assert_eq!(total, 3);

        let Some(MetricSnapshot::Trend(t)) = reg.snapshot("complete_purchase_time") else {
            panic!("expected trend snapshot");
        };
        assert_eq!(t.count(), 1);
        assert_eq!(t.max(), Some(12.5));
    }

    #[test]
    fn push_rejects_unknown_and_mismatched_samples() {
        let reg = Registry::default();
        reg.register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let unknown = reg.push(MetricSample::new("nope", SampleValue::Counter(1)));
        assert!(matches!(unknown, Err(Error::UnknownMetric(_))));

        let mismatch = reg.push(MetricSample::new("errors", SampleValue::Counter(1)));
        assert!(matches!(mismatch, Err(Error::SampleKindMismatch { .. })));
    }

    #[test]
    fn push_rejects_non_finite_trend_values() {
        let reg = Registry::default();
        reg.register("latency", MetricKind::Trend)
            .unwrap_or_else(|e| panic!("{e}"));
        let res = reg.push(MetricSample::new("latency", SampleValue::Trend(f64::NAN)));
        assert!(matches!(res, Err(Error::NonFiniteSample(_))));
    }

    #[test]
    fn summarize_lists_each_series_sorted() {
        let reg = Registry::default();
        let reqs = reg
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        let errors = reg
            .register("errors", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let ok = TagSet::new(&[("step", "create_order"), ("status", "200")]);
        let conflict = TagSet::new(&[("step", "create_order"), ("status", "409")]);
        if let Some(h) = reg.get_handle(reqs, ok) {
            h.add_counter(5);
        }
        if let Some(h) = reg.get_handle(reqs, conflict) {
            h.add_counter(1);
        }
        if let Some(h) = reg.get_handle(errors, TagSet::default()) {
            h.add_rate(true);
            h.add_rate(false);
        }

        let summary = reg.summarize();
        let names: Vec<&str> = summary.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["errors", "http_reqs", "http_reqs"]);

        assert_eq!(
            summary[0].values,
            MetricValue::Rate {
                total: 2,
                trues: 1,
                rate: 0.5
            }
        );
        assert_eq!(summary[1].values, MetricValue::Counter(5));
        assert_eq!(summary[2].values, MetricValue::Counter(1));
    }

    #[test]
    fn concurrent_counter_increments_sum_exactly() {
        let reg = Arc::new(Registry::default());
        let id = reg
            .register("iterations", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        if let Some(h) = reg.get_handle(id, TagSet::default()) {
                            h.add_counter(1);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap_or_else(|_| panic!("writer thread panicked"));
        }

        let Some(MetricSnapshot::Counter(total)) = reg.snapshot("iterations") else {
            panic!("expected counter snapshot");
        };
        assert_eq!(total, 80_000);
    }
}
