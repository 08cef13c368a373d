//! Periodic background tasks
//!
//! Every recurring job in the engine (cache sweep, health probe, risk check,
//! metrics sync) runs through [`PeriodicTask`], so they all share one
//! start/stop story.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Handle to a spawned interval loop
///
/// The first tick fires one `period` after spawning. Ticks missed while a
/// slow tick body runs are skipped rather than burst. Dropping the handle
/// stops the loop at its next await point.
pub struct PeriodicTask {
    name: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("[TASK:{}] started with {:?} period", task_name, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = tick() => {}
                            _ = stop_rx.changed() => break,
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }

            debug!("[TASK:{}] stopped", task_name);
        });

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// A tick in flight is cancelled at its next await point.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Non-blocking "already running" guard over an [`AtomicBool`]
///
/// The flag is cleared on drop, including when the owning future is
/// cancelled mid-cycle.
pub struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    /// Set the flag, or return `None` if it was already set
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);

        let task = PeriodicTask::spawn("counter", Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.stop().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_long_tick() {
        let task = PeriodicTask::spawn("slow", Duration::from_secs(1), || async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(task.name(), "slow");
        assert!(!task.is_finished());

        let start = Instant::now();
        task.stop().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_run_guard_rejects_reentry() {
        let flag = AtomicBool::new(false);

        let guard = RunGuard::try_acquire(&flag);
        assert!(guard.is_some());
        assert!(RunGuard::try_acquire(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(RunGuard::try_acquire(&flag).is_some());
    }
}
