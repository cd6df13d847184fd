use std::sync::Arc;
use std::time::Instant;

use flashload_metrics::{MetricHandle, MetricKind, Registry};

use super::api::{ApiClient, OrderResponse, PaymentResponse, decode};
use super::{AbortReason, IterationOutcome, Scenario, Step, StepOutcome, UnitContext};
use crate::http::Transport;
use crate::request_metrics::{duration_ms, untagged};
use crate::runner::TerminationSignal;

pub const ERRORS: &str = "errors";
pub const SUCCESSFUL_PURCHASES: &str = "successful_purchases";
pub const COMPLETE_PURCHASE_TIME: &str = "complete_purchase_time";
pub const STOCK_EXHAUSTED: &str = "stock_exhausted";

#[derive(Debug, Clone)]
pub struct PurchaseMetrics {
    pub errors: MetricHandle,
    pub successful_purchases: MetricHandle,
    /// Milliseconds from order creation to processed payment.
    pub complete_purchase_time: MetricHandle,
    pub stock_exhausted: MetricHandle,
}

impl PurchaseMetrics {
    pub fn register(registry: &Registry) -> flashload_metrics::Result<Self> {
        Ok(Self {
            errors: untagged(registry, ERRORS, MetricKind::Rate)?,
            successful_purchases: untagged(registry, SUCCESSFUL_PURCHASES, MetricKind::Rate)?,
            complete_purchase_time: untagged(registry, COMPLETE_PURCHASE_TIME, MetricKind::Trend)?,
            stock_exhausted: untagged(registry, STOCK_EXHAUSTED, MetricKind::Counter)?,
        })
    }
}

/// Create order, create payment, process payment. A 409 on the order means the item sold
/// out and stops the whole run.
#[derive(Debug)]
pub struct PurchaseFlow<T> {
    api: ApiClient<T>,
    signal: Arc<TerminationSignal>,
    item_id: u64,
    quantity: u64,
    metrics: PurchaseMetrics,
}

impl<T: Transport> PurchaseFlow<T> {
    pub fn new(
        api: ApiClient<T>,
        signal: Arc<TerminationSignal>,
        item_id: u64,
        quantity: u64,
        metrics: PurchaseMetrics,
    ) -> Self {
        Self {
            api,
            signal,
            item_id,
            quantity,
            metrics,
        }
    }

    async fn create_order(&self, unit: UnitContext) -> StepOutcome<OrderResponse> {
        let step = Step::CreateOrder;
        let query = [
            ("itemId", self.item_id.to_string()),
            ("userId", unit.user_id.to_string()),
            ("quantity", self.quantity.to_string()),
        ];
        let resp = match self
            .api
            .call(step, http::Method::POST, "/api/purchase", &query)
            .await
        {
            StepOutcome::Continue(resp) => resp,
            StepOutcome::Abort(reason) => return StepOutcome::Abort(reason),
        };

        match resp.status {
            200 => decode(step, &resp),
            409 => StepOutcome::Abort(AbortReason::StockExhausted),
            status => StepOutcome::Abort(AbortReason::UnexpectedStatus { step, status }),
        }
    }

    async fn create_payment(&self, order: &OrderResponse) -> StepOutcome<PaymentResponse> {
        self.api
            .fetch_json(
                Step::CreatePayment,
                http::Method::POST,
                "/api/payment",
                &[("orderId", order.id.to_string())],
            )
            .await
    }

    async fn process_payment(&self, payment: &PaymentResponse) -> StepOutcome<()> {
        match self
            .api
            .call_ok(
                Step::ProcessPayment,
                http::Method::POST,
                "/api/payment/process",
                &[("paymentId", payment.id.to_string())],
            )
            .await
        {
            StepOutcome::Continue(_) => StepOutcome::Continue(()),
            StepOutcome::Abort(reason) => StepOutcome::Abort(reason),
        }
    }

    async fn purchase(&self, unit: UnitContext) -> Result<(), AbortReason> {
        let order = self.create_order(unit).await.into_result()?;
        let payment = self.create_payment(&order).await.into_result()?;
        self.process_payment(&payment).await.into_result()
    }
}

impl<T: Transport> Scenario for PurchaseFlow<T> {
    fn name(&self) -> &'static str {
        "purchase-flow"
    }

    async fn iterate(&self, unit: UnitContext) -> IterationOutcome {
        let started = Instant::now();

        match self.purchase(unit).await {
            Ok(()) => {
                self.metrics
                    .complete_purchase_time
                    .add_trend(duration_ms(started.elapsed()));
                self.metrics.successful_purchases.add_rate(true);
                self.metrics.errors.add_rate(false);
                IterationOutcome::Completed
            }
            Err(AbortReason::StockExhausted) => {
                self.metrics.stock_exhausted.add_counter(1);
                if self.signal.set() {
                    tracing::warn!(
                        unit = unit.unit_index,
                        user_id = unit.user_id,
                        item_id = self.item_id,
                        "stock exhausted; no new invocations will start"
                    );
                }
                IterationOutcome::StockExhausted
            }
            Err(reason) => {
                tracing::debug!(unit = unit.unit_index, ?reason, "purchase aborted");
                self.metrics.errors.add_rate(true);
                self.metrics.successful_purchases.add_rate(false);
                IterationOutcome::Failed(reason)
            }
        }
    }
}
