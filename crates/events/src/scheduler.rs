//! Per-alert cancellable timers.
//!
//! Each armed timer is a spawned task racing its [`CancellationToken`]
//! against a sleep. The task runs at most once. Cancelling and firing can
//! still race at this layer; callers resolve that with the alert's status
//! compare-and-set, not with timer ordering.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use vitalwatch_core::types::AlertId;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("No async runtime available to arm timer for alert {0}")]
    NoRuntime(AlertId),

    #[error("Escalation scheduler is shut down")]
    ShutDown,
}

/// Cancels one armed timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    alert_id: AlertId,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn alert_id(&self) -> &str {
        &self.alert_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EscalationScheduler {
    root: CancellationToken,
    armed: Arc<AtomicUsize>,
}

impl EscalationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once `after` has elapsed, unless cancelled first.
    pub fn arm<F>(&self, alert_id: &str, after: Duration, task: F) -> Result<TimerHandle, SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        let runtime =
            Handle::try_current().map_err(|_| SchedulerError::NoRuntime(alert_id.to_string()))?;

        let token = self.root.child_token();
        let cancelled = token.clone();
        let armed = Arc::clone(&self.armed);
        let id = alert_id.to_string();

        armed.fetch_add(1, Ordering::AcqRel);
        runtime.spawn(async move {
            let fired = tokio::select! {
                biased;
                _ = cancelled.cancelled() => false,
                _ = tokio::time::sleep(after) => true,
            };
            armed.fetch_sub(1, Ordering::AcqRel);

            if fired {
                tracing::debug!(
                    alert_id = %id,
                    after_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                    "Timer fired"
                );
                task.await;
            } else {
                tracing::trace!(alert_id = %id, "Timer cancelled");
            }
        });

        Ok(TimerHandle {
            alert_id: alert_id.to_string(),
            token,
        })
    }

    pub fn cancel(&self, handle: &TimerHandle) {
        handle.token.cancel();
    }

    /// Timers that have neither fired nor been cancelled.
    pub fn armed_count(&self) -> usize {
        self.armed.load(Ordering::Acquire)
    }

    /// Cancel every armed timer and refuse new ones.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn bump(count: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let count = Arc::clone(count);
        async move {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let scheduler = EscalationScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        scheduler.arm("a1", Duration::from_secs(1), bump(&count)).unwrap();
        assert_eq!(scheduler.armed_count(), 1);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.armed_count(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire_prevents_task() {
        let scheduler = EscalationScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let handle = scheduler.arm("a1", Duration::from_secs(1), bump(&count)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        scheduler.cancel(&handle);
        assert!(handle.is_cancelled());
        assert_eq!(handle.alert_id(), "a1");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_all_and_refuses_new() {
        let scheduler = EscalationScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        scheduler.arm("a1", Duration::from_secs(1), bump(&count)).unwrap();
        scheduler.arm("a2", Duration::from_secs(2), bump(&count)).unwrap();
        scheduler.shutdown();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_shut_down());
        assert_matches!(
            scheduler.arm("a3", Duration::from_secs(1), bump(&count)),
            Err(SchedulerError::ShutDown)
        );
    }

    #[test]
    fn arming_outside_runtime_fails() {
        let scheduler = EscalationScheduler::new();
        let result = scheduler.arm("a1", Duration::from_secs(1), async {});
        assert_matches!(result, Err(SchedulerError::NoRuntime(id)) if id == "a1");
    }
}
