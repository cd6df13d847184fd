use rand::Rng as _;
use std::time::Duration;

use super::error::{Error, Result};
use crate::thresholds::ThresholdSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// How concurrency moves between the previous stage's target and the current one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum RampMode {
    /// Interpolate linearly across the stage.
    #[default]
    Linear,
    /// Jump to the stage's target as soon as the stage begins.
    Step,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ScenarioKind {
    /// Order → payment → payment processing.
    #[default]
    PurchaseFlow,
    /// Repeated item reads.
    ProductView,
}

impl ScenarioKind {
    /// Thresholds used when a run declares none of its own.
    pub fn default_thresholds(self) -> Vec<ThresholdSet> {
        match self {
            Self::PurchaseFlow => vec![
                ThresholdSet::new("http_req_duration", ["p(95)<5000"]),
                ThresholdSet::new("errors", ["rate<0.99"]),
                ThresholdSet::new("complete_purchase_time", ["p(95)<8000"]),
                ThresholdSet::new("successful_purchases", ["rate>0.005"]),
            ],
            Self::ProductView => vec![
                ThresholdSet::new("http_req_duration", ["p(95)<2000"]),
                ThresholdSet::new("errors", ["rate<0.05"]),
                ThresholdSet::new("product_view_time", ["p(95)<3000"]),
                ThresholdSet::new("successful_views", ["rate>0.95"]),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl ThinkTime {
    pub const NONE: ThinkTime = ThinkTime {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Uniformly random pause in `[min, max]`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let lo = self.min.as_nanos().min(u64::MAX as u128) as u64;
        let hi = self.max.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(rand::rng().random_range(lo..=hi))
    }
}

impl Default for ThinkTime {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(500))
    }
}

/// Where requests go and how each virtual user is parameterized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub base_url: String,
    pub item_id: u64,
    /// Size of the user-id space; ids run `1..=user_count`.
    pub user_count: u64,
    pub quantity: u64,
    pub request_timeout: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            item_id: 12,
            user_count: 5000,
            quantity: 1,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub stages: Vec<Stage>,
    pub ramp_mode: RampMode,
    pub thresholds: Vec<ThresholdSet>,
    pub scenario: ScenarioKind,
    pub target: TargetConfig,
    pub think_time: ThinkTime,
    /// Time granted to in-flight invocations after the termination signal.
    pub termination_grace: Duration,
    /// Upper bound on waiting for retired units at run end.
    pub graceful_stop: Duration,
    pub reconcile_interval: Duration,
    pub setup_probe: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stages: vec![
                Stage::new(Duration::from_secs(5), 1000),
                Stage::new(Duration::from_secs(10), 10_000),
                Stage::new(Duration::from_secs(30), 0),
            ],
            ramp_mode: RampMode::Linear,
            thresholds: ScenarioKind::PurchaseFlow.default_thresholds(),
            scenario: ScenarioKind::PurchaseFlow,
            target: TargetConfig::default(),
            think_time: ThinkTime::default(),
            termination_grace: Duration::from_secs(5),
            graceful_stop: Duration::from_secs(30),
            reconcile_interval: Duration::from_millis(100),
            setup_probe: true,
        }
    }
}

impl RunConfig {
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    pub fn max_target(&self) -> u64 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Checks every knob a run depends on, including threshold syntax.
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() || self.total_duration().is_zero() {
            return Err(Error::InvalidStages);
        }
        if self.target.user_count == 0 {
            return Err(Error::InvalidUserCount);
        }
        if self.target.quantity == 0 {
            return Err(Error::InvalidQuantity);
        }
        if self.think_time.min > self.think_time.max {
            return Err(Error::InvalidThinkTime {
                min: self.think_time.min,
                max: self.think_time.max,
            });
        }
        if self.target.request_timeout.is_zero() {
            return Err(Error::InvalidRequestTimeout);
        }
        if self.reconcile_interval.is_zero() {
            return Err(Error::InvalidReconcileInterval);
        }

        let parsed = url::Url::parse(&self.target.base_url)
            .map_err(|_| Error::InvalidBaseUrl(self.target.base_url.clone()))?;
        if parsed.scheme() != "http" || parsed.host_str().is_none() {
            return Err(Error::InvalidBaseUrl(self.target.base_url.clone()));
        }

        for set in &self.thresholds {
            set.parse()?;
        }
        Ok(())
    }
}
