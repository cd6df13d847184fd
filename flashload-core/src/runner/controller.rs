use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::schedule::RampingSchedule;
use crate::scenario::{Executor, Scenario, UnitContext};

/// Why the controller loop ended.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    /// The stage curve ran to its end.
    Completed,
    /// The termination signal was set by a unit.
    StockExhausted,
}

/// Live counters shared between the controller, its units and progress reporting.
#[derive(Debug, Default)]
pub struct ControllerState {
    live: AtomicU64,
    active: AtomicU64,
    target: AtomicU64,
    peak: AtomicU64,
    spawned: AtomicU64,
}

impl ControllerState {
    /// Units whose task is still running, retired or not.
    pub fn live(&self) -> u64 {
        self.live.load(Ordering::Acquire)
    }

    /// Units not yet marked for retirement.
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Acquire)
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Acquire)
    }
}

/// Decrements the live count when a unit task ends, including on abort.
struct LiveGuard(Arc<ControllerState>);

impl LiveGuard {
    fn enter(state: Arc<ControllerState>) -> Self {
        let live = state.live.fetch_add(1, Ordering::AcqRel) + 1;
        state.peak.fetch_max(live, Ordering::AcqRel);
        Self(state)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Unit {
    index: u64,
    retire: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOutcome {
    pub stop_reason: StopReason,
    pub peak_units: u64,
    pub units_spawned: u64,
    /// Units still running when the final drain timed out.
    pub aborted: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub user_count: u64,
    pub reconcile_interval: Duration,
    pub termination_grace: Duration,
    pub graceful_stop: Duration,
}

/// Keeps the number of running units on the schedule's curve until the curve ends or the
/// termination signal stops the run.
pub struct RampController<S> {
    executor: Arc<Executor<S>>,
    schedule: RampingSchedule,
    opts: ControllerOptions,
    state: Arc<ControllerState>,
    next_index: u64,
    active: Vec<Unit>,
    retired: Vec<Unit>,
}

impl<S: Scenario> RampController<S> {
    pub fn new(
        executor: Arc<Executor<S>>,
        schedule: RampingSchedule,
        opts: ControllerOptions,
    ) -> Self {
        Self {
            executor,
            schedule,
            opts,
            state: Arc::new(ControllerState::default()),
            next_index: 1,
            active: Vec::new(),
            retired: Vec::new(),
        }
    }

    pub fn state(&self) -> Arc<ControllerState> {
        self.state.clone()
    }

    pub async fn run(mut self, started: Instant) -> ControllerOutcome {
        let signal = self.executor.signal().clone();

        let mut interval = tokio::time::interval(self.opts.reconcile_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut terminated_at: Option<Instant> = None;

        let stop_reason = loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = signal.wait(), if terminated_at.is_none() => {}
            }

            if signal.is_set() {
                let since = *terminated_at.get_or_insert_with(|| {
                    tracing::info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        live = self.state.live(),
                        "termination signal observed; retiring all units"
                    );
                    Instant::now()
                });
                self.state.target.store(0, Ordering::Release);
                self.retire_down_to(0);

                if self.state.live() == 0 || since.elapsed() >= self.opts.termination_grace {
                    break StopReason::StockExhausted;
                }
                continue;
            }

            let elapsed = started.elapsed();
            if self.schedule.is_done(elapsed) {
                break StopReason::Completed;
            }
            self.reconcile(self.schedule.target_at(elapsed));
        };

        self.state.target.store(0, Ordering::Release);
        self.retire_down_to(0);

        let drain = match stop_reason {
            StopReason::Completed => self.opts.graceful_stop,
            // The grace period has already been spent in the loop.
            StopReason::StockExhausted => Duration::ZERO,
        };
        let aborted = self.drain(drain).await;

        ControllerOutcome {
            stop_reason,
            peak_units: self.state.peak(),
            units_spawned: self.state.spawned(),
            aborted,
        }
    }

    fn reconcile(&mut self, target: u64) {
        self.state.target.store(target, Ordering::Release);

        let active = self.active.len() as u64;
        if active < target {
            let n = target - active;
            for _ in 0..n {
                self.spawn_unit();
            }
            tracing::debug!(spawned = n, active = target, "units spawned");
        } else if active > target {
            self.retire_down_to(target);
        }

        // Reap units that already exited so handles do not pile up.
        self.retired.retain(|u| !u.handle.is_finished());
    }

    fn spawn_unit(&mut self) {
        let index = self.next_index;
        self.next_index += 1;

        let retire = Arc::new(AtomicBool::new(false));
        let guard = LiveGuard::enter(self.state.clone());
        let handle = tokio::spawn(unit_loop(
            self.executor.clone(),
            index,
            self.opts.user_count,
            retire.clone(),
            guard,
        ));

        self.state.spawned.fetch_add(1, Ordering::AcqRel);
        self.active.push(Unit {
            index,
            retire,
            handle,
        });
        self.state
            .active
            .store(self.active.len() as u64, Ordering::Release);
    }

    /// Newest units retire first.
    fn retire_down_to(&mut self, target: u64) {
        let target = target as usize;
        if self.active.len() <= target {
            return;
        }

        let n = self.active.len() - target;
        for unit in self.active.drain(target..).rev() {
            unit.retire.store(true, Ordering::Release);
            self.retired.push(unit);
        }
        self.state
            .active
            .store(self.active.len() as u64, Ordering::Release);
        tracing::debug!(retired = n, active = target, "units retired");
    }

    async fn drain(&mut self, within: Duration) -> u64 {
        let mut units = std::mem::take(&mut self.retired);
        units.append(&mut self.active);

        // A unit leaves the list only once its handle has been joined.
        let wait_all = async {
            while let Some(unit) = units.last_mut() {
                match (&mut unit.handle).await {
                    Err(err) if err.is_panic() => {
                        tracing::warn!(unit = unit.index, error = %err, "unit panicked");
                    }
                    _ => {}
                }
                units.pop();
            }
        };
        let _ = tokio::time::timeout(within, wait_all).await;

        let aborted = units.len() as u64;
        if aborted > 0 {
            tracing::warn!(aborted, "units still running after drain; aborting");
        }
        for unit in units {
            unit.handle.abort();
            let _ = unit.handle.await;
        }
        aborted
    }
}

async fn unit_loop<S: Scenario>(
    executor: Arc<Executor<S>>,
    index: u64,
    user_count: u64,
    retire: Arc<AtomicBool>,
    _guard: LiveGuard,
) {
    let unit = UnitContext::new(index, user_count);
    while !retire.load(Ordering::Acquire) && !executor.signal().is_set() {
        executor.invoke(unit).await;
        // Instant scenarios must not starve the controller.
        tokio::task::yield_now().await;
    }
}
