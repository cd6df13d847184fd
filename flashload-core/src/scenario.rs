use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::http::HttpTransportErrorKind;
use crate::request_metrics::BuiltinMetrics;
use crate::runner::{TerminationSignal, ThinkTime};

mod api;
mod product_view;
mod purchase;

pub use api::{ApiClient, ItemResponse, OrderResponse, PaymentResponse};
pub use product_view::{ProductView, ProductViewMetrics};
pub use purchase::{PurchaseFlow, PurchaseMetrics};

/// One HTTP call of a scenario; used as the `step` tag on request metrics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    CreateOrder,
    CreatePayment,
    ProcessPayment,
    ViewItem,
    Setup,
}

/// Why an invocation stopped before its last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Transport {
        step: Step,
        kind: HttpTransportErrorKind,
    },
    UnexpectedStatus {
        step: Step,
        status: u16,
    },
    Malformed {
        step: Step,
    },
    /// Order creation answered 409. Control flow, not an error.
    StockExhausted,
}

/// Result of one step: carry on with its data or stop the invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Continue(T),
    Abort(AbortReason),
}

impl<T> StepOutcome<T> {
    pub fn into_result(self) -> Result<T, AbortReason> {
        match self {
            StepOutcome::Continue(v) => Ok(v),
            StepOutcome::Abort(reason) => Err(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The termination signal was already set; nothing was sent or recorded.
    Skipped,
    Completed,
    Failed(AbortReason),
    StockExhausted,
}

impl IterationOutcome {
    fn wants_think_time(&self) -> bool {
        matches!(self, IterationOutcome::Completed | IterationOutcome::Failed(_))
    }
}

/// Identity of the execution unit running an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitContext {
    pub unit_index: u64,
    pub user_id: u64,
}

impl UnitContext {
    pub fn new(unit_index: u64, user_count: u64) -> Self {
        Self {
            unit_index,
            user_id: user_id(unit_index, user_count),
        }
    }
}

/// Maps a unit index onto `1..=user_count`.
pub fn user_id(unit_index: u64, user_count: u64) -> u64 {
    (unit_index % user_count.max(1)) + 1
}

/// Business logic of one invocation. Implementations record their own outcome metrics.
pub trait Scenario: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn iterate(&self, unit: UnitContext) -> impl Future<Output = IterationOutcome> + Send;
}

/// Wraps a scenario with the per-invocation rules shared by every scenario.
#[derive(Debug)]
pub struct Executor<S> {
    scenario: S,
    signal: Arc<TerminationSignal>,
    metrics: BuiltinMetrics,
    think_time: ThinkTime,
}

impl<S: Scenario> Executor<S> {
    pub fn new(
        scenario: S,
        signal: Arc<TerminationSignal>,
        metrics: BuiltinMetrics,
        think_time: ThinkTime,
    ) -> Self {
        Self {
            scenario,
            signal,
            metrics,
            think_time,
        }
    }

    pub fn scenario(&self) -> &S {
        &self.scenario
    }

    pub fn signal(&self) -> &Arc<TerminationSignal> {
        &self.signal
    }

    pub async fn invoke(&self, unit: UnitContext) -> IterationOutcome {
        if self.signal.is_set() {
            return IterationOutcome::Skipped;
        }

        let started = Instant::now();
        let outcome = self.scenario.iterate(unit).await;
        self.metrics.record_iteration(started.elapsed());

        if outcome.wants_think_time() {
            let pause = self.think_time.sample();
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        outcome
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use flashload_metrics::{MetricSnapshot, Registry};

    struct CountingScenario {
        calls: std::sync::atomic::AtomicU64,
        outcome: IterationOutcome,
    }

    impl Scenario for CountingScenario {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn iterate(&self, _unit: UnitContext) -> IterationOutcome {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.outcome
        }
    }

    fn executor(outcome: IterationOutcome) -> (Executor<CountingScenario>, Arc<Registry>) {
        let registry = Arc::new(Registry::default());
        let metrics =
            BuiltinMetrics::register(registry.clone()).unwrap_or_else(|e| panic!("{e}"));
        let exec = Executor::new(
            CountingScenario {
                calls: Default::default(),
                outcome,
            },
            Arc::new(TerminationSignal::new()),
            metrics,
            ThinkTime::NONE,
        );
        (exec, registry)
    }

    #[test]
    fn user_id_wraps_into_user_space() {
        assert_eq!(user_id(1, 5000), 2);
        assert_eq!(user_id(4999, 5000), 5000);
        assert_eq!(user_id(5000, 5000), 1);
        assert_eq!(user_id(5001, 5000), 2);
        assert_eq!(UnitContext::new(6, 5).user_id, 2);
    }

    #[test]
    fn step_outcome_short_circuits_into_result() {
        let ok: StepOutcome<u64> = StepOutcome::Continue(5);
        assert_eq!(ok.into_result(), Ok(5));

        let reason = AbortReason::Malformed {
            step: Step::CreatePayment,
        };
        let abort: StepOutcome<u64> = StepOutcome::Abort(reason);
        assert_eq!(abort.into_result(), Err(reason));
    }

    #[tokio::test]
    async fn invoke_records_iteration_and_returns_outcome() {
        let (exec, registry) = executor(IterationOutcome::Completed);
        let out = exec.invoke(UnitContext::new(1, 10)).await;

        assert_eq!(out, IterationOutcome::Completed);
        assert_eq!(registry.snapshot("iterations"), Some(MetricSnapshot::Counter(1)));
    }

    #[tokio::test]
    async fn invoke_is_a_no_op_once_signal_is_set() {
        let (exec, registry) = executor(IterationOutcome::Completed);
        exec.signal().set();

        let out = exec.invoke(UnitContext::new(1, 10)).await;

        assert_eq!(out, IterationOutcome::Skipped);
        assert_eq!(
            exec.scenario()
                .calls
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );
        assert_eq!(registry.snapshot("iterations"), Some(MetricSnapshot::Counter(0)));
    }

    #[test]
    fn step_tags_are_snake_case() {
        assert_eq!(Step::CreateOrder.as_ref(), "create_order");
        assert_eq!(Step::ProcessPayment.to_string(), "process_payment");
        assert_eq!("view_item".parse::<Step>().ok(), Some(Step::ViewItem));
    }
}
