//! Single-slot background timers.
//!
//! A [`TimerSlot`] owns at most one pending task. Arming it aborts whatever
//! was pending and bumps a generation counter; the spawned task receives its
//! generation and must confirm it is still current (under the same lock that
//! guards the slot) before acting. Abort alone is not enough: a task that
//! already woke up may be waiting for that lock when it gets replaced.

use std::future::Future;
use tokio::task::JoinHandle;

/// One pending timer task per purpose.
#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending task with the one built by `task`.
    ///
    /// `task` receives the new generation. Must be called from within a
    /// tokio runtime.
    pub fn arm<F, Fut>(&mut self, task: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let generation = self.generation;
        self.handle = Some(tokio::spawn(task(generation)));
        generation
    }

    /// Abort the pending task, if any, and invalidate its generation.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether `generation` belongs to the task currently armed.
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    /// Called by a firing task. If it is still current, detach it from the
    /// slot (so a later `cancel` does not abort it mid-flight) and return
    /// `true`; otherwise the task has been superseded and must do nothing.
    pub fn take_if_current(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.handle = None;
        self.generation = self.generation.wrapping_add(1);
        true
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_rearm_aborts_previous_task() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::new();

        for _ in 0..3 {
            let fired = fired.clone();
            slot.arm(|_| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::new();
        let counter = fired.clone();
        slot.arm(|_| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        slot.cancel();
        assert!(!slot.is_armed());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_generation_is_ignored() {
        let slot = Arc::new(Mutex::new(TimerSlot::new()));
        let acted = Arc::new(AtomicUsize::new(0));

        let first = {
            let mut guard = slot.lock().await;
            guard.arm(|_| async {})
        };
        let second = {
            let mut guard = slot.lock().await;
            guard.arm(|_| async {})
        };
        assert_ne!(first, second);

        for generation in [first, second] {
            let mut guard = slot.lock().await;
            if guard.take_if_current(generation) {
                acted.fetch_add(1, Ordering::SeqCst);
            }
        }

        assert_eq!(acted.load(Ordering::SeqCst), 1);
        assert!(!slot.lock().await.is_armed());
    }
}
