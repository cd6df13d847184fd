use std::time::Instant;

use flashload_metrics::{MetricHandle, MetricKind, Registry};

use super::api::{ApiClient, ItemResponse};
use super::{AbortReason, IterationOutcome, Scenario, Step, UnitContext};
use crate::http::Transport;
use crate::request_metrics::{duration_ms, untagged};

pub const ERRORS: &str = "errors";
pub const SUCCESSFUL_VIEWS: &str = "successful_views";
pub const PRODUCT_VIEW_TIME: &str = "product_view_time";

#[derive(Debug, Clone)]
pub struct ProductViewMetrics {
    pub errors: MetricHandle,
    pub successful_views: MetricHandle,
    pub product_view_time: MetricHandle,
}

impl ProductViewMetrics {
    pub fn register(registry: &Registry) -> flashload_metrics::Result<Self> {
        Ok(Self {
            errors: untagged(registry, ERRORS, MetricKind::Rate)?,
            successful_views: untagged(registry, SUCCESSFUL_VIEWS, MetricKind::Rate)?,
            product_view_time: untagged(registry, PRODUCT_VIEW_TIME, MetricKind::Trend)?,
        })
    }
}

/// Reads one item per invocation. Never stops the run.
#[derive(Debug)]
pub struct ProductView<T> {
    api: ApiClient<T>,
    item_id: u64,
    metrics: ProductViewMetrics,
}

impl<T: Transport> ProductView<T> {
    pub fn new(api: ApiClient<T>, item_id: u64, metrics: ProductViewMetrics) -> Self {
        Self {
            api,
            item_id,
            metrics,
        }
    }

    async fn view(&self) -> Result<ItemResponse, AbortReason> {
        let step = Step::ViewItem;
        let path = format!("/api/items/{}", self.item_id);
        let item: ItemResponse = self
            .api
            .fetch_json(step, http::Method::GET, &path, &[])
            .await
            .into_result()?;

        if item.id != self.item_id {
            return Err(AbortReason::Malformed { step });
        }
        Ok(item)
    }
}

impl<T: Transport> Scenario for ProductView<T> {
    fn name(&self) -> &'static str {
        "product-view"
    }

    async fn iterate(&self, unit: UnitContext) -> IterationOutcome {
        let started = Instant::now();

        match self.view().await {
            Ok(_) => {
                self.metrics
                    .product_view_time
                    .add_trend(duration_ms(started.elapsed()));
                self.metrics.successful_views.add_rate(true);
                self.metrics.errors.add_rate(false);
                IterationOutcome::Completed
            }
            Err(reason) => {
                tracing::debug!(unit = unit.unit_index, ?reason, "product view failed");
                self.metrics.successful_views.add_rate(false);
                self.metrics.errors.add_rate(true);
                IterationOutcome::Failed(reason)
            }
        }
    }
}
