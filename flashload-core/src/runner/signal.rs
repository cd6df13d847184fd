use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// Run-wide stop request. Any invocation may set it; it never goes back to unset while a
/// run is in progress.
#[derive(Debug, Default)]
pub struct TerminationSignal {
    set: AtomicBool,
    notify: Notify,
}

impl TerminationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the call that flipped the flag.
    pub fn set(&self) -> bool {
        let first = !self.set.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Only the coordinator calls this, between runs.
    pub(crate) fn reset(&self) {
        self.set.store(false, Ordering::Release);
    }
}
