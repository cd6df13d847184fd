use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{AbortReason, Step, StepOutcome};
use crate::http::{HttpRequest, HttpResponse, HttpTransportErrorKind, Transport};
use crate::request_metrics::{BuiltinMetrics, RequestStatus};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: u64,
    #[serde(default)]
    pub item_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentResponse {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemResponse {
    pub id: u64,
    pub name: String,
    pub price: f64,
    pub stock: i64,
}

/// Target-service calls with request metrics attached.
#[derive(Debug)]
pub struct ApiClient<T> {
    transport: Arc<T>,
    base_url: String,
    timeout: Duration,
    metrics: BuiltinMetrics,
}

impl<T> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            metrics: self.metrics.clone(),
        }
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(
        transport: Arc<T>,
        base_url: &str,
        timeout: Duration,
        metrics: BuiltinMetrics,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            metrics,
        }
    }

    pub fn url(&self, path: &str, query: &[(&str, String)]) -> Option<String> {
        let raw = format!("{}{path}", self.base_url);
        let url = if query.is_empty() {
            url::Url::parse(&raw)
        } else {
            url::Url::parse_with_params(&raw, query.iter().map(|(k, v)| (*k, v.as_str())))
        };
        url.ok().map(String::from)
    }

    /// Sends one empty-bodied JSON request and records it. Any status is a `Continue`.
    pub async fn call(
        &self,
        step: Step,
        method: http::Method,
        path: &str,
        query: &[(&str, String)],
    ) -> StepOutcome<HttpResponse> {
        let Some(url) = self.url(path, query) else {
            return StepOutcome::Abort(AbortReason::Transport {
                step,
                kind: HttpTransportErrorKind::InvalidUrl,
            });
        };

        let req = HttpRequest::new(method, url)
            .json()
            .with_timeout(self.timeout);

        let started = Instant::now();
        let res = self.transport.send(req).await;
        let latency = started.elapsed();

        match res {
            Ok(resp) => {
                self.metrics
                    .record_request(step, RequestStatus::Response(resp.status), latency);
                StepOutcome::Continue(resp)
            }
            Err(err) => {
                let kind = err.transport_error_kind();
                self.metrics
                    .record_request(step, RequestStatus::Transport(kind), latency);
                tracing::debug!(step = %step, error = %err, "request failed");
                StepOutcome::Abort(AbortReason::Transport { step, kind })
            }
        }
    }

    /// Like [`ApiClient::call`] but anything other than 200 aborts.
    pub async fn call_ok(
        &self,
        step: Step,
        method: http::Method,
        path: &str,
        query: &[(&str, String)],
    ) -> StepOutcome<HttpResponse> {
        match self.call(step, method, path, query).await {
            StepOutcome::Continue(resp) if resp.status == 200 => StepOutcome::Continue(resp),
            StepOutcome::Continue(resp) => StepOutcome::Abort(AbortReason::UnexpectedStatus {
                step,
                status: resp.status,
            }),
            StepOutcome::Abort(reason) => StepOutcome::Abort(reason),
        }
    }

    /// 200 with a body that decodes as `D`.
    pub async fn fetch_json<D: DeserializeOwned>(
        &self,
        step: Step,
        method: http::Method,
        path: &str,
        query: &[(&str, String)],
    ) -> StepOutcome<D> {
        match self.call_ok(step, method, path, query).await {
            StepOutcome::Continue(resp) => decode(step, &resp),
            StepOutcome::Abort(reason) => StepOutcome::Abort(reason),
        }
    }
}

pub fn decode<D: DeserializeOwned>(step: Step, resp: &HttpResponse) -> StepOutcome<D> {
    match serde_json::from_slice(&resp.body) {
        Ok(v) => StepOutcome::Continue(v),
        Err(err) => {
            tracing::debug!(step = %step, error = %err, "malformed response body");
            StepOutcome::Abort(AbortReason::Malformed { step })
        }
    }
}
