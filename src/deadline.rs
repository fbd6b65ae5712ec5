//! Deadline feasibility check for retry scheduling.
//!
//! The deadline is a wall-clock budget measured from the *original* failure
//! of an execution, not from its most recent retry. Backoff and deadline are
//! independent axes: a steep backoff curve can exhaust the deadline long
//! before delays stop growing, and the deadline is the sole stopping
//! condition (there is no retry-count cap).
//!
//! The check gates only the arming of *new* retries. An already-armed timer
//! always fires and is dispatched, even if wall time has passed the deadline
//! by the time it does.

use tokio::time::Instant;

use crate::strategy::FailureStrategy;

/// Whether a retry landing at `candidate_retry_at` is still inside the
/// deadline budget of an execution that first failed at `first_failure_at`.
///
/// Permitted iff `candidate_retry_at <= first_failure_at + deadline`; the
/// boundary instant itself is inside the budget. A deadline too large to
/// represent on the clock never exhausts.
pub fn is_within_deadline(
    strategy: &FailureStrategy,
    first_failure_at: Instant,
    candidate_retry_at: Instant,
) -> bool {
    match first_failure_at.checked_add(strategy.deadline()) {
        Some(cutoff) => candidate_retry_at <= cutoff,
        None => true,
    }
}
