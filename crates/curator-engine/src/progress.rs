use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use curator_contracts::progress::{JobKind, LifecycleState, Progress, ProgressSnapshot};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Observable state for one job kind. Clones share the same state; observers
/// hold a [`watch::Receiver`] and never mutate.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    kind: JobKind,
    grace: Duration,
    // Bumped on every begin/reset so a stale done->idle timer becomes a no-op.
    epoch: AtomicU64,
    tx: watch::Sender<ProgressSnapshot>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("kind", &self.inner.kind)
            .field("snapshot", &*self.inner.tx.borrow())
            .finish()
    }
}

impl ProgressStore {
    pub fn new(kind: JobKind, grace: Duration) -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::idle());
        Self {
            inner: Arc::new(StoreInner {
                kind,
                grace,
                epoch: AtomicU64::new(0),
                tx,
            }),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.inner.kind
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.tx.borrow().clone()
    }

    /// Enters `running` with a zeroed counter. Only an idle store may begin.
    pub fn begin(&self, total: u64) -> Result<()> {
        let mut entered = false;
        self.inner.tx.send_if_modified(|snapshot| {
            if snapshot.state != LifecycleState::Idle {
                return false;
            }
            *snapshot = ProgressSnapshot {
                state: LifecycleState::Running,
                progress: Some(Progress {
                    current: 0,
                    total,
                    current_model: None,
                }),
            };
            entered = true;
            true
        });
        if !entered {
            return Err(OrchestratorError::BatchAlreadyRunning(self.inner.kind));
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_active_model(&self, model: &str) {
        self.update_running(|progress| {
            if progress.current_model.as_deref() == Some(model) {
                return false;
            }
            progress.current_model = Some(model.to_string());
            true
        });
    }

    /// Counts one finished unit of work, saturating at `total`.
    pub fn advance(&self) {
        self.update_running(|progress| {
            if progress.current >= progress.total {
                return false;
            }
            progress.current += 1;
            true
        });
    }

    /// Terminal until [`ProgressStore::reset`]; counters are kept as observed.
    pub fn cancel(&self) {
        self.inner.tx.send_if_modified(|snapshot| {
            if snapshot.state != LifecycleState::Running {
                return false;
            }
            snapshot.state = LifecycleState::Cancelled;
            true
        });
    }

    /// Marks the run `done` and schedules the revert to `idle` after the grace window.
    pub fn finish(&self) {
        let finished = self.inner.tx.send_if_modified(|snapshot| {
            if snapshot.state != LifecycleState::Running {
                return false;
            }
            snapshot.state = LifecycleState::Done;
            true
        });
        if !finished {
            return;
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(kind = self.inner.kind.as_str(), "no runtime; done state kept until reset");
            return;
        };
        let store = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(store.inner.grace).await;
            store.revert_done(epoch);
        });
    }

    /// Returns to `{state: idle, progress: null}` from any state.
    pub fn reset(&self) -> ProgressSnapshot {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.tx.send_replace(ProgressSnapshot::idle());
        ProgressSnapshot::idle()
    }

    fn revert_done(&self, epoch: u64) {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        self.inner.tx.send_if_modified(|snapshot| {
            if snapshot.state != LifecycleState::Done {
                return false;
            }
            *snapshot = ProgressSnapshot::idle();
            true
        });
    }

    fn update_running(&self, apply: impl FnOnce(&mut Progress) -> bool) {
        self.inner.tx.send_if_modified(|snapshot| {
            if snapshot.state != LifecycleState::Running {
                return false;
            }
            match snapshot.progress.as_mut() {
                Some(progress) => apply(progress),
                None => false,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProgressStore {
        ProgressStore::new(JobKind::Generate, Duration::from_millis(3000))
    }

    #[test]
    fn only_idle_may_begin() {
        let store = store();
        assert!(store.begin(3).is_ok());
        assert!(matches!(
            store.begin(3),
            Err(OrchestratorError::BatchAlreadyRunning(JobKind::Generate))
        ));

        store.cancel();
        assert!(store.begin(3).is_err());
        store.reset();
        assert!(store.begin(1).is_ok());
    }

    #[test]
    fn advance_never_passes_total() {
        let store = store();
        store.begin(2).ok();
        store.set_active_model("sdxl");
        for _ in 0..5 {
            store.advance();
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.current(), 2);
        assert_eq!(
            snapshot.progress.and_then(|p| p.current_model),
            Some("sdxl".to_string())
        );
    }

    #[test]
    fn updates_outside_a_run_are_ignored() {
        let store = store();
        store.advance();
        store.set_active_model("flux");
        store.finish();
        assert_eq!(store.snapshot(), ProgressSnapshot::idle());
    }

    #[test]
    fn reset_is_idempotent_from_every_state() {
        let store = store();
        assert_eq!(store.reset(), ProgressSnapshot::idle());

        store.begin(4).ok();
        store.advance();
        store.cancel();
        assert_eq!(store.snapshot().state, LifecycleState::Cancelled);
        assert_eq!(store.reset(), ProgressSnapshot::idle());
        assert_eq!(store.reset(), ProgressSnapshot::idle());
        assert_eq!(store.snapshot(), ProgressSnapshot::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn done_reverts_to_idle_after_grace() {
        let store = store();
        let mut rx = store.subscribe();
        store.begin(1).ok();
        store.advance();
        store.finish();
        assert_eq!(store.snapshot().state, LifecycleState::Done);

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(store.snapshot().state, LifecycleState::Done);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(store.snapshot(), ProgressSnapshot::idle());
        assert!(rx.has_changed().unwrap_or(false));
        assert_eq!(*rx.borrow_and_update(), ProgressSnapshot::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_grace_timer_does_not_touch_a_new_run() {
        let store = store();
        store.begin(1).ok();
        store.finish();
        store.reset();
        store.begin(5).ok();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.snapshot().state, LifecycleState::Running);
        assert_eq!(store.snapshot().total(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_is_not_reverted() {
        let store = store();
        store.begin(2).ok();
        store.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.snapshot().state, LifecycleState::Cancelled);
    }
}
