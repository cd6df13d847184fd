use std::time::Duration;

use super::schedule::StageSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

impl From<StageSnapshot> for StageProgress {
    fn from(s: StageSnapshot) -> Self {
        Self {
            stage: s.index + 1,
            stages: s.count,
            stage_elapsed: s.stage_elapsed,
            stage_remaining: s.stage_remaining,
            start_target: s.start_target,
            end_target: s.end_target,
            current_target: s.current_target,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub stage: Option<StageProgress>,
    /// Running unit tasks, including retired ones finishing their last invocation.
    pub live_units: u64,
    pub target_units: u64,
    pub iterations_total: u64,
    /// Iterations/sec observed during the last progress interval.
    pub iterations_per_sec_now: f64,
    pub http_reqs_total: u64,
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,
    pub terminated: bool,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

/// Per-second rate of `delta` over `dt`, zero for an empty interval.
pub(crate) fn per_sec(delta: u64, dt: Duration) -> f64 {
    let secs = dt.as_secs_f64();
    if secs > 0.0 { delta as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_index_is_one_based() {
        let p = StageProgress::from(StageSnapshot {
            index: 0,
            count: 3,
            stage_elapsed: Duration::from_secs(5),
            stage_remaining: Duration::from_secs(5),
            start_target: 0,
            end_target: 30,
            current_target: 15,
        });
        assert_eq!(p.stage, 1);
        assert_eq!(p.stages, 3);
        assert_eq!(p.current_target, 15);
    }

    #[test]
    fn per_sec_handles_empty_interval() {
        assert_eq!(per_sec(10, Duration::ZERO), 0.0);
        assert_eq!(per_sec(10, Duration::from_millis(500)), 20.0);
    }
}
