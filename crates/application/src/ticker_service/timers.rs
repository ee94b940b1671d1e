use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use drover_domain::next_cron_fire;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Kind of work a timer performs when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    StepRunTimeout,
    GetGroupKeyRunTimeout,
    JobRunTimeout,
    Cron,
    ScheduledWorkflow,
}

/// Timer identity: at most one timer is armed per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct TimerKey {
    pub(crate) kind: TimerKind,
    pub(crate) id: String,
}

impl TimerKey {
    pub(crate) fn new(kind: TimerKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

struct TimerEntry {
    generation: u64,
    cancellation: CancellationToken,
}

/// Instance-private set of armed timers.
///
/// Firing and cancelling both remove the entry; whoever removes it acts, the
/// other side becomes a no-op.
pub(crate) struct TimerRegistry {
    timers: DashMap<TimerKey, TimerEntry>,
    next_generation: AtomicU64,
    cancellation: CancellationToken,
    tracker: TaskTracker,
}

impl TimerRegistry {
    pub(crate) fn new(cancellation: CancellationToken, tracker: TaskTracker) -> Arc<Self> {
        Arc::new(Self {
            timers: DashMap::new(),
            next_generation: AtomicU64::new(0),
            cancellation,
            tracker,
        })
    }

    /// Arms a one-shot timer; a deadline in the past fires immediately.
    pub(crate) fn schedule_once<F, Fut>(
        self: &Arc<Self>,
        key: TimerKey,
        deadline: DateTime<Utc>,
        fire: F,
    ) where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (generation, cancellation) = self.register(key.clone());
        let registry = Arc::clone(self);

        self.tracker.spawn(async move {
            tokio::select! {
                () = cancellation.cancelled() => return,
                () = tokio::time::sleep(delay_until(deadline)) => {}
            }

            if registry.take_if_current(&key, generation) {
                fire().await;
            }
        });
    }

    /// Arms a recurring timer that re-arms after every fire until cancelled.
    pub(crate) fn schedule_recurring<F, Fut>(self: &Arc<Self>, key: TimerKey, schedule: Schedule, fire: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (generation, cancellation) = self.register(key.clone());
        let registry = Arc::clone(self);

        self.tracker.spawn(async move {
            let mut after = Utc::now();
            loop {
                let Some(next) = next_cron_fire(&schedule, after) else {
                    registry.take_if_current(&key, generation);
                    return;
                };

                tokio::select! {
                    () = cancellation.cancelled() => return,
                    () = tokio::time::sleep(delay_until(next)) => {}
                }

                if !registry.is_current(&key, generation) {
                    return;
                }

                fire().await;
                after = next.max(Utc::now());
            }
        });
    }

    /// Disarms a timer; returns false when nothing was armed under the key.
    pub(crate) fn cancel(&self, key: &TimerKey) -> bool {
        match self.timers.remove(key) {
            Some((_, entry)) => {
                entry.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    /// Disarms every timer.
    pub(crate) fn clear(&self) {
        self.timers
            .iter()
            .for_each(|entry| entry.value().cancellation.cancel());
        self.timers.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }

    fn register(&self, key: TimerKey) -> (u64, CancellationToken) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancellation = self.cancellation.child_token();

        let previous = self.timers.insert(
            key,
            TimerEntry {
                generation,
                cancellation: cancellation.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancellation.cancel();
        }

        (generation, cancellation)
    }

    fn take_if_current(&self, key: &TimerKey, generation: u64) -> bool {
        self.timers
            .remove_if(key, |_, entry| entry.generation == generation)
            .is_some()
    }

    fn is_current(&self, key: &TimerKey, generation: u64) -> bool {
        self.timers
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
    }
}

fn delay_until(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}
