//! Retry scheduler: the owner of all in-flight retry state.
//!
//! One [`RetryScheduler`] is the single scheduling authority for every
//! failing task execution it is told about. It is the sole mutator of
//! retry state and the sole owner of retry timers.
//!
//! Semantics:
//! - `on_failure` creates state on first sight of an execution id, computes
//!   the next backoff delay, and either arms a retry timer or escalates when
//!   the wall-clock deadline (measured from the first failure) would be
//!   exceeded.
//! - A firing timer re-dispatches the execution through
//!   [`TaskDispatcher`] and bumps the attempt count; the outcome comes back
//!   later as another `on_failure` or an `on_success`.
//! - Escalation applies the strategy's
//!   [`ExhaustionAction`](crate::ExhaustionAction) and notifies the
//!   [`EventSink`] at most once per retry-state lifetime.
//! - `on_success`/`on_cancel` destroy the state (idempotent for unknown
//!   ids) and release a blocked execution via the sink's `unblock`.
//!
//! Invariants:
//! - State transitions for one execution id are strictly sequential; ids
//!   never share mutable state beyond the map that holds them.
//! - Timers are the only suspension mechanism. All armed timers live in one
//!   time-ordered heap drained by a single worker task, so thousands of
//!   concurrently retrying executions cost one sleeper, not one task each.
//! - An already-armed timer always fires and dispatches, even if the
//!   deadline has passed by then; the deadline gates only the arming of new
//!   retries.
//! - A timer firing after `on_cancel` (or after the state was recreated) is
//!   recognized by its stale generation ticket and dropped.
//!
//! The scheduler requires a tokio runtime; construction spawns the timer
//! worker, and dropping the scheduler aborts it.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

use crate::backoff;
use crate::deadline;
use crate::dispatch::TaskDispatcher;
use crate::sink::{self, EventSink, SinkRetryPolicy};
use crate::state::{ExecutionId, RetryState, RetryStatus};
use crate::strategy::{ExhaustionAction, FailureStrategy};

/// Armed retry timers, earliest due first. The generation ticket makes every
/// armed timer uniquely identifiable across state lifetimes.
type TimerHeap = BinaryHeap<Reverse<(Instant, u64, ExecutionId)>>;

#[derive(Debug, Default)]
struct SchedulerEntries {
    states: HashMap<ExecutionId, RetryState>,
    timers: TimerHeap,
}

#[derive(Debug)]
struct SchedulerInner {
    entries: Mutex<SchedulerEntries>,
    timer_armed: Notify,
    generations: AtomicU64,
    dispatcher: Arc<dyn TaskDispatcher>,
    sink: Arc<dyn EventSink>,
    sink_retry: SinkRetryPolicy,
}

impl SchedulerInner {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }
}

/// What a failure report resolved to, decided under the state lock and acted
/// on after it is released.
#[derive(Debug)]
enum FailureAction {
    Ignored { status: RetryStatus },
    Armed { due_at: Instant, attempt: u32 },
    FireEvent(String),
    FireEventAndBlock(String),
    Fail,
}

/// Owns all active retry state and the shared timer heap.
#[derive(Debug)]
pub struct RetryScheduler {
    inner: Arc<SchedulerInner>,
    worker: JoinHandle<()>,
}

impl RetryScheduler {
    /// Create a scheduler with the default [`SinkRetryPolicy`].
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_sink_retry(dispatcher, sink, SinkRetryPolicy::default())
    }

    /// Create a scheduler with a custom delivery-retry policy for the sink.
    pub fn with_sink_retry(
        dispatcher: Arc<dyn TaskDispatcher>,
        sink: Arc<dyn EventSink>,
        sink_retry: SinkRetryPolicy,
    ) -> Self {
        let inner = Arc::new(SchedulerInner {
            entries: Mutex::new(SchedulerEntries::default()),
            timer_armed: Notify::new(),
            generations: AtomicU64::new(1),
            dispatcher,
            sink,
            sink_retry,
        });
        let worker = tokio::spawn(run_timers(Arc::clone(&inner)));
        Self { inner, worker }
    }

    /// Report a failed (initial or retried) run of `id`.
    ///
    /// Creates the retry state on first sight (`attempt = 0`,
    /// `first_failure_at = now`). Arms a retry timer when the candidate
    /// retry instant is inside the deadline budget; escalates per the
    /// strategy's exhaustion action otherwise. No-ops while the execution is
    /// `Blocked`, and while a retry is already armed (a duplicate report
    /// would otherwise stretch the backoff curve).
    pub async fn on_failure(&self, id: &ExecutionId, strategy: &FailureStrategy, now: Instant) {
        let action = {
            let mut guard = self.inner.entries.lock().expect("scheduler state poisoned");
            let entries = &mut *guard;
            let state =
                entries.states.entry(id.clone()).or_insert_with(|| RetryState::new(now));
            match state.status() {
                RetryStatus::Blocked => FailureAction::Ignored { status: RetryStatus::Blocked },
                RetryStatus::AwaitingRetry(due_at) => {
                    FailureAction::Ignored { status: RetryStatus::AwaitingRetry(due_at) }
                }
                _ => {
                    let attempt = state.attempt();
                    let first_failure_at = state.first_failure_at();
                    let due_at = now + backoff::delay_for_attempt(strategy, attempt);
                    if deadline::is_within_deadline(strategy, first_failure_at, due_at) {
                        let generation = self.inner.next_generation();
                        state.await_retry(due_at, generation);
                        entries.timers.push(Reverse((due_at, generation, id.clone())));
                        FailureAction::Armed { due_at, attempt }
                    } else {
                        state.exhaust();
                        match strategy.exhaustion_action() {
                            ExhaustionAction::FireEvent(name) => {
                                let name = name.clone();
                                entries.states.remove(id);
                                FailureAction::FireEvent(name)
                            }
                            ExhaustionAction::FireEventAndBlock(name) => {
                                state.block();
                                FailureAction::FireEventAndBlock(name.clone())
                            }
                            ExhaustionAction::Fail => {
                                entries.states.remove(id);
                                FailureAction::Fail
                            }
                        }
                    }
                }
            }
        };

        match action {
            FailureAction::Ignored { status } => {
                warn!(
                    target: "secondwind::scheduler",
                    %id,
                    ?status,
                    "failure report ignored in current status"
                );
            }
            FailureAction::Armed { due_at, attempt } => {
                debug!(target: "secondwind::scheduler", %id, attempt, ?due_at, "retry armed");
                self.inner.timer_armed.notify_one();
            }
            FailureAction::FireEvent(event) => {
                debug!(
                    target: "secondwind::scheduler",
                    %id,
                    event,
                    "deadline exceeded; firing event"
                );
                self.deliver_event(id, &event).await;
            }
            FailureAction::FireEventAndBlock(event) => {
                debug!(
                    target: "secondwind::scheduler",
                    %id,
                    event,
                    "deadline exceeded; firing event and blocking"
                );
                self.deliver_event(id, &event).await;
                self.deliver_block(id).await;
            }
            FailureAction::Fail => {
                debug!(target: "secondwind::scheduler", %id, "deadline exceeded; failing");
                self.deliver_failed(id).await;
            }
        }
    }

    /// Report that `id` completed successfully. Destroys the retry state;
    /// a no-op for unknown ids. Releases a blocked execution.
    pub async fn on_success(&self, id: &ExecutionId) {
        self.resolve(id, "success").await;
    }

    /// Cancel retry handling for `id`: disarms any pending timer and
    /// destroys the retry state. Safe from any status; a no-op for unknown
    /// ids. Releases a blocked execution.
    pub async fn on_cancel(&self, id: &ExecutionId) {
        self.resolve(id, "cancelled").await;
    }

    /// Current status of `id`, if it has live retry state.
    pub fn status(&self, id: &ExecutionId) -> Option<RetryStatus> {
        let guard = self.inner.entries.lock().expect("scheduler state poisoned");
        guard.states.get(id).map(|state| state.status())
    }

    /// Statuses of all live retry states, sorted by execution id.
    pub fn snapshot(&self) -> Vec<(ExecutionId, RetryStatus)> {
        let guard = self.inner.entries.lock().expect("scheduler state poisoned");
        let mut entries: Vec<_> =
            guard.states.iter().map(|(id, state)| (id.clone(), state.status())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    async fn resolve(&self, id: &ExecutionId, outcome: &str) {
        let transition = {
            let mut guard = self.inner.entries.lock().expect("scheduler state poisoned");
            guard.states.remove(id).map(|mut state| {
                let prior = state.status();
                state.resolve();
                (prior, state.status())
            })
        };
        match transition {
            None => {
                debug!(
                    target: "secondwind::scheduler",
                    %id,
                    outcome,
                    "resolution for unknown execution; no-op"
                );
            }
            Some((prior, finished)) => {
                debug!(
                    target: "secondwind::scheduler",
                    %id,
                    outcome,
                    from = ?prior,
                    to = ?finished,
                    "execution resolved"
                );
                if prior.is_blocked() {
                    self.deliver_unblock(id).await;
                }
            }
        }
    }

    async fn deliver_event(&self, id: &ExecutionId, event: &str) {
        let sink = &self.inner.sink;
        if let Err(err) =
            sink::deliver_with_retry(&self.inner.sink_retry, || sink.fire_event(id, event)).await
        {
            error!(
                target: "secondwind::scheduler",
                %id,
                event,
                %err,
                "exhaustion event lost after redelivery budget"
            );
        }
    }

    async fn deliver_block(&self, id: &ExecutionId) {
        let sink = &self.inner.sink;
        if let Err(err) =
            sink::deliver_with_retry(&self.inner.sink_retry, || sink.block(id)).await
        {
            error!(
                target: "secondwind::scheduler",
                %id,
                %err,
                "block signal lost after redelivery budget"
            );
        }
    }

    async fn deliver_unblock(&self, id: &ExecutionId) {
        let sink = &self.inner.sink;
        if let Err(err) =
            sink::deliver_with_retry(&self.inner.sink_retry, || sink.unblock(id)).await
        {
            error!(
                target: "secondwind::scheduler",
                %id,
                %err,
                "unblock signal lost after redelivery budget"
            );
        }
    }

    async fn deliver_failed(&self, id: &ExecutionId) {
        let sink = &self.inner.sink;
        if let Err(err) =
            sink::deliver_with_retry(&self.inner.sink_retry, || sink.failed(id)).await
        {
            error!(
                target: "secondwind::scheduler",
                %id,
                %err,
                "failure notification lost after redelivery budget"
            );
        }
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Single scheduling worker: sleeps until the earliest armed timer, wakes
/// early when a new timer is armed, dispatches everything that has come due.
async fn run_timers(inner: Arc<SchedulerInner>) {
    loop {
        let next_due = {
            let guard = inner.entries.lock().expect("scheduler state poisoned");
            guard.timers.peek().map(|Reverse((due_at, _, _))| *due_at)
        };
        match next_due {
            None => inner.timer_armed.notified().await,
            Some(due_at) => {
                tokio::select! {
                    _ = time::sleep_until(due_at) => fire_due(&inner).await,
                    _ = inner.timer_armed.notified() => {}
                }
            }
        }
    }
}

/// Pop and dispatch every timer entry whose due instant has passed. Entries
/// whose generation no longer matches live state are the residue of a
/// cancellation or resolution and are dropped without dispatching.
async fn fire_due(inner: &Arc<SchedulerInner>) {
    loop {
        let now = Instant::now();
        let fire = {
            let mut guard = inner.entries.lock().expect("scheduler state poisoned");
            let entries = &mut *guard;
            let has_due =
                matches!(entries.timers.peek(), Some(Reverse((due_at, _, _))) if *due_at <= now);
            if !has_due {
                break;
            }
            let Some(Reverse((_, generation, id))) = entries.timers.pop() else {
                break;
            };
            match entries.states.get_mut(&id) {
                Some(state)
                    if state.generation() == generation
                        && matches!(state.status(), RetryStatus::AwaitingRetry(_)) =>
                {
                    state.record_dispatch();
                    let attempt = state.attempt();
                    Some((id, attempt))
                }
                _ => {
                    debug!(target: "secondwind::scheduler", %id, "stale timer dropped");
                    None
                }
            }
        };
        if let Some((id, attempt)) = fire {
            debug!(
                target: "secondwind::scheduler",
                %id,
                attempt,
                "retry timer fired; redispatching"
            );
            inner.dispatcher.redispatch(&id, attempt).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, NullSink};
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct CountingDispatcher {
        count: AtomicU64,
    }

    #[async_trait]
    impl TaskDispatcher for CountingDispatcher {
        async fn redispatch(&self, _id: &ExecutionId, _attempt: u32) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn strategy(deadline: Duration) -> FailureStrategy {
        FailureStrategy::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(100),
            deadline,
            ExhaustionAction::Fail,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_awaiting_retry_with_due_instant() {
        let scheduler =
            RetryScheduler::new(Arc::new(CountingDispatcher::default()), Arc::new(NullSink));
        let id = ExecutionId::from("exec-1");
        let now = Instant::now();

        assert_eq!(scheduler.status(&id), None);
        scheduler.on_failure(&id, &strategy(Duration::from_secs(60)), now).await;
        assert_eq!(
            scheduler.status(&id),
            Some(RetryStatus::AwaitingRetry(now + Duration::from_millis(100)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_sorted_by_execution_id() {
        let scheduler =
            RetryScheduler::new(Arc::new(CountingDispatcher::default()), Arc::new(NullSink));
        let strategy = strategy(Duration::from_secs(60));
        let now = Instant::now();

        for name in ["zeta", "alpha", "mid"] {
            scheduler.on_failure(&ExecutionId::from(name), &strategy, now).await;
        }

        let ids: Vec<String> =
            scheduler.snapshot().into_iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test(start_paused = true)]
    async fn resolving_unknown_execution_is_a_noop() {
        let sink = Arc::new(MemorySink::new());
        let scheduler =
            RetryScheduler::new(Arc::new(CountingDispatcher::default()), sink.clone());
        let id = ExecutionId::from("ghost");

        scheduler.on_success(&id).await;
        scheduler.on_cancel(&id).await;

        assert!(sink.is_empty());
        assert_eq!(scheduler.status(&id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_failure_report_keeps_the_armed_timer() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let scheduler = RetryScheduler::new(dispatcher.clone(), Arc::new(NullSink));
        let strategy = strategy(Duration::from_secs(60));
        let id = ExecutionId::from("exec-1");
        let now = Instant::now();

        scheduler.on_failure(&id, &strategy, now).await;
        let armed = scheduler.status(&id);
        scheduler.on_failure(&id, &strategy, now).await;
        assert_eq!(scheduler.status(&id), armed, "second report must not re-arm");

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dispatcher.count.load(Ordering::SeqCst), 1, "exactly one dispatch");
    }
}
