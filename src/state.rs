//! Per-execution retry bookkeeping.
//!
//! One `RetryState` exists for each in-flight failing task execution. It is
//! created on the first failure report, mutated only by the scheduler, and
//! destroyed when the execution resolves (success, cancellation, or an
//! operator resolving a blocked execution). Many states share one read-only
//! [`FailureStrategy`](crate::FailureStrategy); none of them own it.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

/// Opaque identifier correlating scheduler state to a task execution.
///
/// Cheap to clone; ordered and hashable so it can key the scheduler map and
/// ride inside timer entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(Arc<str>);

impl ExecutionId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExecutionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ExecutionId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Where one failing execution currently sits in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// Dispatched (or re-dispatched) and awaiting an outcome report.
    Pending,
    /// A retry timer is armed for the contained instant.
    AwaitingRetry(Instant),
    /// The deadline was exceeded; the exhaustion action is being applied.
    Exhausted,
    /// Halted until an operator resolves the execution.
    Blocked,
    /// Terminal: the execution succeeded or was cancelled.
    Resolved,
}

impl RetryStatus {
    /// `Pending` and `AwaitingRetry` are the only retriable statuses.
    pub fn is_retriable(&self) -> bool {
        matches!(self, RetryStatus::Pending | RetryStatus::AwaitingRetry(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RetryStatus::Blocked)
    }
}

/// Mutable retry progress of one task execution.
///
/// Exclusively owned by the scheduler's map entry for that execution id; the
/// scheduler is the only mutator. `generation` is the globally unique ticket
/// of the currently armed timer, so a timer firing after cancellation (or
/// after the state was recreated for a later failure of the same id) can be
/// recognized as stale and dropped.
#[derive(Debug)]
pub(crate) struct RetryState {
    attempt: u32,
    first_failure_at: Instant,
    status: RetryStatus,
    generation: u64,
}

impl RetryState {
    pub(crate) fn new(first_failure_at: Instant) -> Self {
        Self { attempt: 0, first_failure_at, status: RetryStatus::Pending, generation: 0 }
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn first_failure_at(&self) -> Instant {
        self.first_failure_at
    }

    pub(crate) fn status(&self) -> RetryStatus {
        self.status
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Arm a retry: record the timer ticket and due instant.
    pub(crate) fn await_retry(&mut self, due_at: Instant, generation: u64) {
        self.status = RetryStatus::AwaitingRetry(due_at);
        self.generation = generation;
    }

    /// The armed timer fired and the execution was re-dispatched.
    pub(crate) fn record_dispatch(&mut self) {
        self.attempt += 1;
        self.status = RetryStatus::Pending;
    }

    pub(crate) fn exhaust(&mut self) {
        self.status = RetryStatus::Exhausted;
    }

    pub(crate) fn block(&mut self) {
        self.status = RetryStatus::Blocked;
    }

    pub(crate) fn resolve(&mut self) {
        self.status = RetryStatus::Resolved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn execution_id_displays_its_content() {
        let id = ExecutionId::from("order-17/ShipOrder");
        assert_eq!(id.to_string(), "order-17/ShipOrder");
        assert_eq!(id.as_str(), "order-17/ShipOrder");
    }

    #[test]
    fn execution_id_equality_and_ordering() {
        let a = ExecutionId::from("a");
        let b = ExecutionId::from(String::from("b"));
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(a, ExecutionId::from("a"));
    }

    #[tokio::test]
    async fn new_state_starts_pending_at_attempt_zero() {
        let state = RetryState::new(Instant::now());
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.status(), RetryStatus::Pending);
        assert_eq!(state.generation(), 0);
        assert!(state.status().is_retriable());
    }

    #[tokio::test]
    async fn retry_cycle_walks_the_state_machine() {
        let now = Instant::now();
        let due = now + Duration::from_millis(100);
        let mut state = RetryState::new(now);

        state.await_retry(due, 7);
        assert_eq!(state.status(), RetryStatus::AwaitingRetry(due));
        assert_eq!(state.generation(), 7);
        assert!(state.status().is_retriable());

        state.record_dispatch();
        assert_eq!(state.attempt(), 1);
        assert_eq!(state.status(), RetryStatus::Pending);
        assert_eq!(state.first_failure_at(), now, "first failure timestamp is set once");

        state.exhaust();
        assert!(!state.status().is_retriable());
        state.block();
        assert!(state.status().is_blocked());

        state.resolve();
        assert_eq!(state.status(), RetryStatus::Resolved);
    }
}
