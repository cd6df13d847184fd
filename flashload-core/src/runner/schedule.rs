use std::time::Duration;

use super::config::{RampMode, Stage};

#[derive(Debug, Clone)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Desired concurrency as a function of elapsed run time.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    mode: RampMode,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(start: u64, mode: RampMode, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            mode,
            stages,
            cumulative_ends,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Index of the stage active at `elapsed`. Stage boundaries belong to the stage that ends
    /// there.
    fn stage_index(&self, elapsed: Duration) -> usize {
        match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration) {
        let end = self.cumulative_ends[idx];
        let start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        (start, end)
    }

    fn start_target_of(&self, idx: usize) -> u64 {
        if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        }
    }

    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() {
            return self.start;
        }

        if elapsed >= self.total_duration() {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        }

        if elapsed == Duration::ZERO && self.mode == RampMode::Linear {
            return self.start;
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end) = self.stage_bounds(idx);
        let start_target = self.start_target_of(idx);
        let end_target = self.stages[idx].target;

        let stage_duration = stage_end.saturating_sub(stage_start);
        if stage_duration.is_zero() || self.mode == RampMode::Step {
            return end_target;
        }

        let stage_elapsed = elapsed.saturating_sub(stage_start);

        // Linear interpolation across the stage.
        let start_i = start_target as i128;
        let end_i = end_target as i128;
        let delta = end_i - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let total = self.total_duration();
        let clamped = elapsed.min(total);

        let idx = if clamped >= total {
            self.stages.len().saturating_sub(1)
        } else {
            self.stage_index(clamped)
        };

        let (stage_start, stage_end) = self.stage_bounds(idx);
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = clamped.saturating_sub(stage_start);
        let stage_remaining = stage_duration.saturating_sub(stage_elapsed);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining,
            start_target: self.start_target_of(idx),
            end_target: self.stages[idx].target,
            current_target: self.target_at(clamped),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn plateau_stages() -> Vec<Stage> {
        vec![
            Stage::new(secs(10), 30),
            Stage::new(secs(30), 30),
            Stage::new(secs(10), 0),
        ]
    }

    #[test]
    fn linear_ramp_interpolates_between_stage_targets() {
        let s = RampingSchedule::new(0, RampMode::Linear, plateau_stages());
        assert_eq!(s.total_duration(), secs(50));

        assert_eq!(s.target_at(Duration::ZERO), 0);
        let at_5 = s.target_at(secs(5));
        assert!(at_5 > 0 && at_5 < 30, "target at 5s was {at_5}");
        assert_eq!(at_5, 15);
        assert_eq!(s.target_at(secs(10)), 30);
        assert_eq!(s.target_at(secs(20)), 30);
        assert_eq!(s.target_at(secs(45)), 15);
        assert_eq!(s.target_at(secs(50)), 0);
        assert_eq!(s.target_at(secs(60)), 0);
    }

    #[test]
    fn step_ramp_jumps_to_stage_targets() {
        let s = RampingSchedule::new(0, RampMode::Step, plateau_stages());

        assert_eq!(s.target_at(Duration::ZERO), 30);
        assert_eq!(s.target_at(secs(5)), 30);
        assert_eq!(s.target_at(secs(20)), 30);
        assert_eq!(s.target_at(secs(45)), 0);
        assert!(s.is_done(secs(50)));
    }

    #[test]
    fn linear_ramp_is_monotonic_within_a_rising_stage() {
        let s = RampingSchedule::new(0, RampMode::Linear, vec![Stage::new(secs(5), 1000)]);
        let mut last = 0;
        for ms in (0..=5000).step_by(50) {
            let cur = s.target_at(Duration::from_millis(ms));
            assert!(cur >= last, "target dropped at {ms}ms");
            last = cur;
        }
        assert_eq!(last, 1000);
    }

    #[test]
    fn zero_length_stage_jumps_immediately() {
        let s = RampingSchedule::new(
            0,
            RampMode::Linear,
            vec![Stage::new(Duration::ZERO, 50), Stage::new(secs(10), 50)],
        );
        assert_eq!(s.target_at(Duration::from_millis(1)), 50);
        assert_eq!(s.target_at(secs(5)), 50);
    }

    #[test]
    fn stage_snapshot_reports_position() {
        let s = RampingSchedule::new(0, RampMode::Linear, plateau_stages());

        let snap = s
            .stage_snapshot_at(secs(15))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(5));
        assert_eq!(snap.stage_remaining, secs(25));
        assert_eq!(snap.start_target, 30);
        assert_eq!(snap.end_target, 30);
        assert_eq!(snap.current_target, 30);

        let end = s
            .stage_snapshot_at(secs(99))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(end.index, 2);
        assert_eq!(end.stage_remaining, Duration::ZERO);
        assert_eq!(end.current_target, 0);

        assert!(
            RampingSchedule::new(0, RampMode::Linear, Vec::new())
                .stage_snapshot_at(secs(1))
                .is_none()
        );
    }
}
