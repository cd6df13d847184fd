use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Rate { total: u64, trues: u64, rate: f64 },
    Trend(TrendSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub med: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    pub total: u64,
    pub trues: u64,
}

impl RateSnapshot {
    /// Fraction of true samples, 0 when nothing was recorded.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.trues as f64 / self.total as f64
    }

    pub(crate) fn merge(&mut self, other: RateSnapshot) {
        self.total = self.total.saturating_add(other.total);
        self.trues = self.trues.saturating_add(other.trues);
    }
}

/// Point-in-time copy of a trend, sorted ascending.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrendSnapshot {
    sorted: Vec<f64>,
    sum: f64,
}

impl TrendSnapshot {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.retain(|v| v.is_finite());
        samples.sort_unstable_by(f64::total_cmp);
        let sum = samples.iter().sum();
        Self {
            sorted: samples,
            sum,
        }
    }

    pub fn count(&self) -> u64 {
        self.sorted.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    pub fn avg(&self) -> Option<f64> {
        (!self.sorted.is_empty()).then(|| self.sum / self.sorted.len() as f64)
    }

    /// Linear interpolation between closest ranks. `p` is clamped to `[0, 100]`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        percentile_of_sorted(&self.sorted, p)
    }

    pub fn summary(&self) -> TrendSummary {
        TrendSummary {
            count: self.count(),
            min: self.min(),
            max: self.max(),
            avg: self.avg(),
            med: self.percentile(50.0),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        }
    }

    pub(crate) fn merge(self, other: TrendSnapshot) -> TrendSnapshot {
        if self.sorted.is_empty() {
            return other;
        }
        if other.sorted.is_empty() {
            return self;
        }

        let mut merged = Vec::with_capacity(self.sorted.len() + other.sorted.len());
        let mut a = self.sorted.into_iter().peekable();
        let mut b = other.sorted.into_iter().peekable();
        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x.total_cmp(y).is_le() => a.next(),
                (Some(_), Some(_)) => b.next(),
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => break,
            };
            if let Some(v) = next {
                merged.push(v);
            }
        }

        TrendSnapshot {
            sorted: merged,
            sum: self.sum + other.sum,
        }
    }
}

pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 100.0) };

    let rank = p / 100.0 * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let lo_v = sorted.get(lo).copied()?;
    let hi_v = sorted.get(hi).copied()?;
    if lo == hi {
        return Some(lo_v);
    }

    Some(lo_v + (hi_v - lo_v) * (rank - lo as f64))
}

#[derive(Debug, Default)]
pub struct RateTally {
    total: u64,
    trues: u64,
}

#[derive(Debug, Default)]
pub struct TrendTally {
    samples: Vec<f64>,
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    // Both tallies move under one lock so readers never see trues > total.
    Rate(Arc<Mutex<RateTally>>),
    Trend(Arc<Mutex<TrendTally>>),
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricStorage::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Rate => MetricStorage::Rate(Arc::new(Mutex::new(RateTally::default()))),
            MetricKind::Trend => MetricStorage::Trend(Arc::new(Mutex::new(TrendTally::default()))),
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            MetricStorage::Counter(a) => MetricHandle::Counter(a.clone()),
            MetricStorage::Rate(a) => MetricHandle::Rate(a.clone()),
            MetricStorage::Trend(a) => MetricHandle::Trend(a.clone()),
        }
    }
}

/// Write handle for one series. Cheap to clone and safe to share across tasks.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Rate(Arc<Mutex<RateTally>>),
    Trend(Arc<Mutex<TrendTally>>),
}

impl MetricHandle {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricHandle::Counter(_) => MetricKind::Counter,
            MetricHandle::Rate(_) => MetricKind::Rate,
            MetricHandle::Trend(_) => MetricKind::Trend,
        }
    }

    #[inline]
    pub fn add_counter(&self, delta: u64) {
        if let MetricHandle::Counter(c) = self {
            c.fetch_add(delta, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, value: bool) {
        if let MetricHandle::Rate(r) = self {
            let mut r = r.lock();
            r.total = r.total.saturating_add(1);
            if value {
                r.trues = r.trues.saturating_add(1);
            }
        }
    }

    /// Non-finite values are dropped.
    #[inline]
    pub fn add_trend(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if let MetricHandle::Trend(t) = self {
            t.lock().samples.push(value);
        }
    }

    pub fn counter(&self) -> u64 {
        if let MetricHandle::Counter(c) = self {
            c.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn rate(&self) -> RateSnapshot {
        if let MetricHandle::Rate(r) = self {
            let r = r.lock();
            RateSnapshot {
                total: r.total,
                trues: r.trues,
            }
        } else {
            RateSnapshot::default()
        }
    }

    pub fn trend(&self) -> TrendSnapshot {
        if let MetricHandle::Trend(t) = self {
            // Copy under the lock, sort outside it.
            let samples = t.lock().samples.clone();
            TrendSnapshot::from_samples(samples)
        } else {
            TrendSnapshot::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn metric_kind_round_trips_through_strings() {
        assert_eq!(MetricKind::Trend.to_string(), "trend");
        assert_eq!("rate".parse::<MetricKind>().ok(), Some(MetricKind::Rate));
        assert!("histogram".parse::<MetricKind>().is_err());
    }

    #[test]
    fn rate_is_zero_without_samples() {
        let h = MetricStorage::new(MetricKind::Rate).handle();
        assert_eq!(h.rate().rate(), 0.0);
        assert_eq!(h.rate().total, 0);
    }

    #[test]
    fn rate_counts_trues_over_total() {
        let h = MetricStorage::new(MetricKind::Rate).handle();
        h.add_rate(true);
        h.add_rate(false);
        h.add_rate(false);
        h.add_rate(true);
        let snap = h.rate();
        assert_eq!(snap, RateSnapshot { total: 4, trues: 2 });
        assert!((snap.rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn trend_summary_empty_has_no_stats() {
        let s = TrendSnapshot::default().summary();
        assert_eq!(s.count, 0);
        assert!(s.min.is_none());
        assert!(s.max.is_none());
        assert!(s.avg.is_none());
        assert!(s.med.is_none());
        assert!(s.p95.is_none());
    }

    #[test]
    fn trend_percentiles_interpolate_linearly() {
        let h = MetricStorage::new(MetricKind::Trend).handle();
        for v in [40.0, 10.0, 30.0, 20.0] {
            h.add_trend(v);
        }
        let t = h.trend();

        assert_eq!(t.count(), 4);
        assert_eq!(t.min(), Some(10.0));
        assert_eq!(t.max(), Some(40.0));
        assert_eq!(t.avg(), Some(25.0));
        assert_eq!(t.percentile(50.0), Some(25.0));
        // rank = 0.9 * 3 = 2.7 -> 30 + 0.7 * 10
        let p90 = t.percentile(90.0).unwrap_or_else(|| panic!("expected p90"));
        assert!((p90 - 37.0).abs() < 1e-9);
    }

    #[test]
    fn trend_single_sample_is_every_percentile() {
        let t = TrendSnapshot::from_samples(vec![7.5]);
        assert_eq!(t.percentile(0.0), Some(7.5));
        assert_eq!(t.percentile(50.0), Some(7.5));
        assert_eq!(t.percentile(100.0), Some(7.5));
    }

    #[test]
    fn trend_ignores_non_finite_values() {
        let h = MetricStorage::new(MetricKind::Trend).handle();
        h.add_trend(f64::NAN);
        h.add_trend(f64::INFINITY);
        h.add_trend(3.0);
        assert_eq!(h.trend().count(), 1);
    }

    #[test]
    fn trend_merge_keeps_order_and_sum() {
        let a = TrendSnapshot::from_samples(vec![1.0, 5.0, 9.0]);
        let b = TrendSnapshot::from_samples(vec![2.0, 6.0]);
        let m = a.merge(b);
        assert_eq!(m.count(), 5);
        assert_eq!(m.min(), Some(1.0));
        assert_eq!(m.max(), Some(9.0));
        assert_eq!(m.percentile(50.0), Some(5.0));
        assert_eq!(m.avg(), Some(23.0 / 5.0));
    }

    #[test]
    fn handles_ignore_writes_of_other_kinds() {
        let c = MetricStorage::new(MetricKind::Counter).handle();
        c.add_rate(true);
        c.add_trend(1.0);
        c.add_counter(3);
        assert_eq!(c.counter(), 3);
        assert_eq!(c.rate(), RateSnapshot::default());
        assert!(c.trend().is_empty());
    }

    proptest! {
        #[test]
        fn percentile_endpoints_are_min_and_max(
            values in proptest::collection::vec(-1.0e6f64..1.0e6, 1..200),
        ) {
            let t = TrendSnapshot::from_samples(values);
            prop_assert_eq!(t.percentile(0.0), t.min());
            prop_assert_eq!(t.percentile(100.0), t.max());
        }

        #[test]
        fn percentile_is_monotonic(
            values in proptest::collection::vec(-1.0e6f64..1.0e6, 1..200),
            p1 in 0.0f64..=100.0,
            p2 in 0.0f64..=100.0,
        ) {
            let t = TrendSnapshot::from_samples(values);
            let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
            let a = t.percentile(lo).unwrap_or(f64::NAN);
            let b = t.percentile(hi).unwrap_or(f64::NAN);
            prop_assert!(a <= b + 1e-6, "p({lo})={a} > p({hi})={b}");
        }

        #[test]
        fn rate_stays_within_unit_interval(outcomes in proptest::collection::vec(any::<bool>(), 0..500)) {
            let h = MetricStorage::new(MetricKind::Rate).handle();
            for o in &outcomes {
                h.add_rate(*o);
            }
            let snap = h.rate();
            let expected_trues = outcomes.iter().filter(|o| **o).count() as u64;
            prop_assert_eq!(snap.total, outcomes.len() as u64);
            prop_assert_eq!(snap.trues, expected_trues);
            prop_assert!((0.0..=1.0).contains(&snap.rate()));
        }

        #[test]
        fn concurrent_writers_lose_no_samples(
            writers in proptest::collection::vec(
                proptest::collection::vec(
                    (0u64..1_000, any::<bool>(), (-1_000_000i32..1_000_000).prop_map(f64::from)),
                    0..200,
                ),
                1..8,
            ),
        ) {
            let counter = MetricStorage::new(MetricKind::Counter).handle();
            let rate = MetricStorage::new(MetricKind::Rate).handle();
            let trend = MetricStorage::new(MetricKind::Trend).handle();
            let done = std::sync::atomic::AtomicBool::new(false);

            std::thread::scope(|s| {
                let reader = s.spawn(|| {
                    let mut last_total = 0;
                    while !done.load(Ordering::Acquire) {
                        let snap = rate.rate();
                        assert!(snap.trues <= snap.total, "trues {} > total {}", snap.trues, snap.total);
                        assert!(snap.total >= last_total, "total went backwards");
                        last_total = snap.total;
                        std::thread::yield_now();
                    }
                });

                let handles: Vec<_> = writers
                    .iter()
                    .map(|ops| {
                        let (counter, rate, trend) = (&counter, &rate, &trend);
                        s.spawn(move || {
                            for (delta, outcome, value) in ops {
                                counter.add_counter(*delta);
                                rate.add_rate(*outcome);
                                trend.add_trend(*value);
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap_or_else(|_| panic!("writer thread panicked"));
                }
                done.store(true, Ordering::Release);
                reader.join().unwrap_or_else(|_| panic!("reader thread panicked"));
            });

            let ops: Vec<_> = writers.iter().flatten().collect();
            let expected_sum: u64 = ops.iter().map(|(d, _, _)| *d).sum();
            let expected_trues = ops.iter().filter(|(_, o, _)| *o).count() as u64;
            let mut expected_samples: Vec<f64> = ops.iter().map(|(_, _, v)| *v).collect();
            expected_samples.sort_unstable_by(f64::total_cmp);
            // Integer-valued samples keep the sum exact in any order.
            let expected_trend_sum: f64 = expected_samples.iter().sum();

            prop_assert_eq!(counter.counter(), expected_sum);
            prop_assert_eq!(
                rate.rate(),
                RateSnapshot { total: ops.len() as u64, trues: expected_trues }
            );
            let t = trend.trend();
            prop_assert_eq!(t.count(), ops.len() as u64);
            prop_assert_eq!(t.sum, expected_trend_sum);
            prop_assert_eq!(t.sorted, expected_samples);
        }
    }
}
