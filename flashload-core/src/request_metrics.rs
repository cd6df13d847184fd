use std::sync::Arc;
use std::time::Duration;

use flashload_metrics::{MetricHandle, MetricId, MetricKind, Registry, TagSet};

use crate::http::HttpTransportErrorKind;
use crate::scenario::Step;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";

/// Metrics recorded for every request and every non-skipped invocation.
#[derive(Debug, Clone)]
pub struct BuiltinMetrics {
    registry: Arc<Registry>,
    http_reqs: MetricId,
    /// Milliseconds.
    http_req_duration: MetricId,
    http_req_failed: MetricId,
    iterations: MetricHandle,
    /// Milliseconds.
    iteration_duration: MetricHandle,
}

#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Response(u16),
    Transport(HttpTransportErrorKind),
}

impl RequestStatus {
    /// Transport failures and 4xx/5xx count as failed requests.
    pub fn is_failed(&self) -> bool {
        match self {
            RequestStatus::Response(status) => *status >= 400,
            RequestStatus::Transport(_) => true,
        }
    }

    fn tag_value(&self) -> String {
        match self {
            RequestStatus::Response(status) => status.to_string(),
            RequestStatus::Transport(kind) => kind.to_string(),
        }
    }
}

impl BuiltinMetrics {
    pub fn register(registry: Arc<Registry>) -> flashload_metrics::Result<Self> {
        let http_reqs = registry.register(HTTP_REQS, MetricKind::Counter)?;
        let http_req_duration = registry.register(HTTP_REQ_DURATION, MetricKind::Trend)?;
        let http_req_failed = registry.register(HTTP_REQ_FAILED, MetricKind::Rate)?;
        let iterations = untagged(&registry, ITERATIONS, MetricKind::Counter)?;
        let iteration_duration = untagged(&registry, ITERATION_DURATION, MetricKind::Trend)?;

        Ok(Self {
            registry,
            http_reqs,
            http_req_duration,
            http_req_failed,
            iterations,
            iteration_duration,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn record_request(&self, step: Step, status: RequestStatus, latency: Duration) {
        let status_tag = status.tag_value();
        let tags = TagSet::new(&[("step", step.as_ref()), ("status", status_tag.as_str())]);

        if let Some(h) = self.registry.get_handle(self.http_reqs, tags.clone()) {
            h.add_counter(1);
        }
        if let Some(h) = self
            .registry
            .get_handle(self.http_req_failed, tags.clone())
        {
            h.add_rate(status.is_failed());
        }
        if let Some(h) = self.registry.get_handle(self.http_req_duration, tags) {
            h.add_trend(duration_ms(latency));
        }
    }

    pub fn record_iteration(&self, duration: Duration) {
        self.iterations.add_counter(1);
        self.iteration_duration.add_trend(duration_ms(duration));
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations.counter()
    }

    pub fn http_reqs_total(&self) -> u64 {
        self.registry
            .query(self.http_reqs)
            .snapshot()
            .map(|s| match s {
                flashload_metrics::MetricSnapshot::Counter(v) => v,
                _ => 0,
            })
            .unwrap_or(0)
    }
}

/// Registers `name` and returns the handle of its untagged series.
pub fn untagged(
    registry: &Registry,
    name: &str,
    kind: MetricKind,
) -> flashload_metrics::Result<MetricHandle> {
    let id = registry.register(name, kind)?;
    registry
        .get_handle(id, TagSet::default())
        .ok_or_else(|| flashload_metrics::Error::UnknownMetric(name.to_string()))
}

pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashload_metrics::MetricSnapshot;

    #[test]
    fn record_request_tags_by_step_and_status() {
        let registry = Arc::new(Registry::default());
        let m = BuiltinMetrics::register(registry.clone()).unwrap_or_else(|e| panic!("{e}"));

        m.record_request(
            Step::CreateOrder,
            RequestStatus::Response(200),
            Duration::from_millis(12),
        );
        m.record_request(
            Step::CreateOrder,
            RequestStatus::Response(409),
            Duration::from_millis(3),
        );
        m.record_request(
            Step::CreatePayment,
            RequestStatus::Transport(HttpTransportErrorKind::Timeout),
            Duration::from_millis(30),
        );

        assert_eq!(m.http_reqs_total(), 3);

        let Some(MetricSnapshot::Rate(failed)) = registry.snapshot(HTTP_REQ_FAILED) else {
            panic!("expected rate");
        };
        assert_eq!(failed.total, 3);
        assert_eq!(failed.trues, 2);

        let (id, _) = registry
            .lookup(HTTP_REQ_DURATION)
            .unwrap_or_else(|| panic!("missing metric"));
        let Some(MetricSnapshot::Trend(order)) = registry
            .query(id)
            .matching(TagSet::new(&[("step", "create_order")]))
            .snapshot()
        else {
            panic!("expected trend");
        };
        assert_eq!(order.count(), 2);
        assert_eq!(order.max(), Some(12.0));

        let timeout = TagSet::new(&[("step", "create_payment"), ("status", "timeout")]);
        assert!(
            registry
                .summarize()
                .iter()
                .any(|s| s.name == HTTP_REQS && s.tags == timeout.to_pairs())
        );
    }

    #[test]
    fn record_iteration_counts_and_times() {
        let registry = Arc::new(Registry::default());
        let m = BuiltinMetrics::register(registry.clone()).unwrap_or_else(|e| panic!("{e}"));
        m.record_iteration(Duration::from_millis(250));
        m.record_iteration(Duration::from_millis(750));

        assert_eq!(m.iterations_total(), 2);
        let Some(MetricSnapshot::Trend(t)) = registry.snapshot(ITERATION_DURATION) else {
            panic!("expected trend");
        };
        assert_eq!(t.avg(), Some(500.0));
    }
}
