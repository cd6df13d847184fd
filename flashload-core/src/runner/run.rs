use std::sync::Arc;
use std::time::Duration;

use flashload_metrics::{MetricKind, MetricSeriesSummary, MetricValue, Registry};
use tokio::time::{Instant, MissedTickBehavior};

use super::config::{RunConfig, ScenarioKind};
use super::controller::{
    ControllerOptions, ControllerOutcome, ControllerState, RampController, StopReason,
};
use super::error::Result;
use super::progress::{ProgressFn, ProgressUpdate, StageProgress, per_sec};
use super::schedule::RampingSchedule;
use super::signal::TerminationSignal;
use crate::http::Transport;
use crate::request_metrics::BuiltinMetrics;
use crate::scenario::{
    ApiClient, Executor, ItemResponse, ProductView, ProductViewMetrics, PurchaseFlow,
    PurchaseMetrics, Scenario, Step, StepOutcome,
};
use crate::thresholds::{self, ThresholdResult, applicable_kinds};

/// All series of one metric folded together.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub name: String,
    pub kind: MetricKind,
    pub values: MetricValue,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub scenario: ScenarioKind,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
    pub peak_units: u64,
    pub units_spawned: u64,
    pub units_aborted: u64,
    pub iterations: u64,
    pub http_reqs: u64,
    /// Sorted by name.
    pub metrics: Vec<MetricSummary>,
    /// Per tag combination, sorted by name then tags.
    pub series: Vec<MetricSeriesSummary>,
    pub thresholds: Vec<ThresholdResult>,
    pub passed: bool,
    /// Item returned by the setup probe, if it ran and succeeded.
    pub setup: Option<ItemResponse>,
}

impl RunReport {
    /// Completed invocations per second over the whole run.
    pub fn throughput(&self) -> f64 {
        per_sec(self.iterations, self.elapsed)
    }
}

/// Owns the termination signal and drives one run from setup to report.
#[derive(Debug)]
pub struct Coordinator<T> {
    config: RunConfig,
    transport: Arc<T>,
    signal: Arc<TerminationSignal>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(config: RunConfig, transport: Arc<T>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            signal: Arc::new(TerminationSignal::new()),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn signal(&self) -> &Arc<TerminationSignal> {
        &self.signal
    }

    pub async fn run(&self, progress: Option<ProgressFn>) -> Result<RunReport> {
        self.signal.reset();

        let registry = Arc::new(Registry::default());
        let builtin = BuiltinMetrics::register(registry.clone())?;
        let api = ApiClient::new(
            self.transport.clone(),
            &self.config.target.base_url,
            self.config.target.request_timeout,
            builtin.clone(),
        );

        let setup = if self.config.setup_probe {
            self.setup(&api).await
        } else {
            None
        };

        let outcome = match self.config.scenario {
            ScenarioKind::PurchaseFlow => {
                let metrics = PurchaseMetrics::register(&registry)?;
                let flow = PurchaseFlow::new(
                    api,
                    self.signal.clone(),
                    self.config.target.item_id,
                    self.config.target.quantity,
                    metrics,
                );
                self.drive(flow, &registry, &builtin, progress).await
            }
            ScenarioKind::ProductView => {
                let metrics = ProductViewMetrics::register(&registry)?;
                let view = ProductView::new(api, self.config.target.item_id, metrics);
                self.drive(view, &registry, &builtin, progress).await
            }
        };

        self.teardown(&registry, &builtin, outcome, setup)
    }

    /// Non-fatal probe of the item under test.
    async fn setup(&self, api: &ApiClient<T>) -> Option<ItemResponse> {
        let path = format!("/api/items/{}", self.config.target.item_id);
        match api
            .fetch_json::<ItemResponse>(Step::Setup, http::Method::GET, &path, &[])
            .await
        {
            StepOutcome::Continue(item) => {
                tracing::info!(
                    item_id = item.id,
                    name = %item.name,
                    price = item.price,
                    stock = item.stock,
                    "setup probe ok"
                );
                Some(item)
            }
            StepOutcome::Abort(reason) => {
                tracing::warn!(?reason, "setup probe failed; continuing");
                None
            }
        }
    }

    async fn drive<S: Scenario>(
        &self,
        scenario: S,
        registry: &Arc<Registry>,
        builtin: &BuiltinMetrics,
        progress: Option<ProgressFn>,
    ) -> (ControllerOutcome, Duration) {
        tracing::info!(
            scenario = scenario.name(),
            stages = self.config.stages.len(),
            max_target = self.config.max_target(),
            duration_ms = self.config.total_duration().as_millis() as u64,
            ramp_mode = %self.config.ramp_mode,
            base_url = %self.config.target.base_url,
            "run starting"
        );
        self.warn_inapplicable_thresholds(registry);

        let executor = Arc::new(Executor::new(
            scenario,
            self.signal.clone(),
            builtin.clone(),
            self.config.think_time,
        ));
        let schedule = RampingSchedule::new(0, self.config.ramp_mode, self.config.stages.clone());
        let controller = RampController::new(
            executor,
            schedule.clone(),
            ControllerOptions {
                user_count: self.config.target.user_count,
                reconcile_interval: self.config.reconcile_interval,
                termination_grace: self.config.termination_grace,
                graceful_stop: self.config.graceful_stop,
            },
        );

        let started = Instant::now();
        let progress_handle = progress.map(|progress| {
            tokio::spawn(progress_loop(
                progress,
                started,
                schedule,
                controller.state(),
                builtin.clone(),
                self.signal.clone(),
            ))
        });

        let outcome = controller.run(started).await;
        let elapsed = started.elapsed();

        if let Some(h) = progress_handle {
            h.abort();
            let _ = h.await;
        }
        (outcome, elapsed)
    }

    fn warn_inapplicable_thresholds(&self, registry: &Registry) {
        for set in &self.config.thresholds {
            let Ok((selector, exprs)) = set.parse() else {
                continue;
            };
            let Some((_, kind)) = registry.lookup(&selector.name) else {
                tracing::warn!(metric = %set.metric, "threshold references an unknown metric");
                continue;
            };
            for (raw, expr) in set.expressions.iter().zip(exprs) {
                if !applicable_kinds(expr.agg).contains(&kind) {
                    tracing::warn!(
                        metric = %set.metric,
                        expression = %raw,
                        %kind,
                        "threshold aggregation does not apply to this metric kind"
                    );
                }
            }
        }
    }

    fn teardown(
        &self,
        registry: &Registry,
        builtin: &BuiltinMetrics,
        (outcome, elapsed): (ControllerOutcome, Duration),
        setup: Option<ItemResponse>,
    ) -> Result<RunReport> {
        let thresholds = thresholds::evaluate_thresholds(registry, &self.config.thresholds)?;
        let passed = thresholds::all_passed(&thresholds);

        let mut metrics: Vec<MetricSummary> = registry
            .metric_names()
            .into_iter()
            .filter_map(|(name, kind)| {
                registry.snapshot(&name).map(|s| MetricSummary {
                    name: name.to_string(),
                    kind,
                    values: s.value(),
                })
            })
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));

        for r in thresholds.iter().filter(|r| !r.passed) {
            tracing::warn!(
                metric = %r.metric,
                expression = %r.expression,
                observed = ?r.observed,
                "threshold failed"
            );
        }

        let report = RunReport {
            scenario: self.config.scenario,
            elapsed,
            stop_reason: outcome.stop_reason,
            peak_units: outcome.peak_units,
            units_spawned: outcome.units_spawned,
            units_aborted: outcome.aborted,
            iterations: builtin.iterations_total(),
            http_reqs: builtin.http_reqs_total(),
            metrics,
            series: registry.summarize(),
            thresholds,
            passed,
            setup,
        };

        tracing::info!(
            stop_reason = %report.stop_reason,
            elapsed_ms = report.elapsed.as_millis() as u64,
            iterations = report.iterations,
            http_reqs = report.http_reqs,
            peak_units = report.peak_units,
            passed = report.passed,
            "run finished"
        );
        Ok(report)
    }
}

async fn progress_loop(
    progress: ProgressFn,
    started: Instant,
    schedule: RampingSchedule,
    state: Arc<ControllerState>,
    builtin: BuiltinMetrics,
    signal: Arc<TerminationSignal>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    let mut tick: u64 = 0;
    let mut last_at = Instant::now();
    let mut last_iterations = builtin.iterations_total();
    let mut last_http_reqs = builtin.http_reqs_total();

    loop {
        interval.tick().await;

        tick = tick.saturating_add(1);
        let now = Instant::now();
        let dt = now.duration_since(last_at);
        last_at = now;

        let elapsed = started.elapsed();
        let iterations_total = builtin.iterations_total();
        let http_reqs_total = builtin.http_reqs_total();

        progress(ProgressUpdate {
            tick,
            elapsed,
            total_duration: schedule.total_duration(),
            stage: schedule.stage_snapshot_at(elapsed).map(StageProgress::from),
            live_units: state.live(),
            target_units: state.target(),
            iterations_total,
            iterations_per_sec_now: per_sec(iterations_total.saturating_sub(last_iterations), dt),
            http_reqs_total,
            rps_now: per_sec(http_reqs_total.saturating_sub(last_http_reqs), dt),
            terminated: signal.is_set(),
        });

        last_iterations = iterations_total;
        last_http_reqs = http_reqs_total;
    }
}
