//! Event sink collaborator: where exhaustion escalations go.
//!
//! The scheduler talks to the surrounding workflow engine through
//! [`EventSink`]: named exhaustion events, unconditional failure reports, and
//! the block/unblock halt signals for dependent work. How those calls
//! propagate into the wider process graph is the engine's concern; this crate
//! only guarantees the at-most-once invocation contract per retry-state
//! lifetime.
//!
//! Losing an exhaustion notification would silently strand a blocked
//! execution, so failed deliveries are retried internally with a small
//! bounded backoff of their own ([`SinkRetryPolicy`]), independent of the
//! task's [`FailureStrategy`](crate::FailureStrategy). Delivery retries are
//! jittered; the task backoff curve itself never is.
//!
//! [`NullSink`], [`LogSink`], and [`MemorySink`] cover embedding, logging,
//! and test needs.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::{rng, Rng};

use crate::state::ExecutionId;

/// Errors raised by an [`EventSink`] implementation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink could not accept the notification.
    #[error("sink delivery failed: {0}")]
    Delivery(String),
}

/// External collaborator receiving escalation notifications.
///
/// Implementations must be idempotent per notification; the scheduler
/// guarantees it will not fire the same exhaustion twice for one retry-state
/// lifetime, but delivery retries may repeat a call the sink already
/// processed before erroring.
#[async_trait]
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Deliver a named exhaustion event for `id`.
    async fn fire_event(&self, id: &ExecutionId, event_name: &str) -> Result<(), SinkError>;

    /// Report unconditional failure of `id`.
    async fn failed(&self, id: &ExecutionId) -> Result<(), SinkError>;

    /// Halt downstream dependents of `id`.
    async fn block(&self, id: &ExecutionId) -> Result<(), SinkError>;

    /// Release a previously blocked `id`.
    async fn unblock(&self, id: &ExecutionId) -> Result<(), SinkError>;
}

/// Bounded backoff applied to failed sink deliveries.
///
/// Deliberately separate from any task's retry policy: this is the
/// scheduler's own plumbing, not workflow semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkRetryPolicy {
    /// Total delivery attempts per notification (at least 1).
    pub max_attempts: u32,
    /// Delay before the first redelivery; doubles per attempt.
    pub initial_delay: Duration,
    /// Upper clamp on the redelivery delay.
    pub max_delay: Duration,
}

impl Default for SinkRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Run one sink call to completion under `policy`, redelivering on error.
///
/// Returns the last error once the attempt budget is spent.
pub(crate) async fn deliver_with_retry<F, Fut>(
    policy: &SinkRetryPolicy,
    mut call: F,
) -> Result<(), SinkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), SinkError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    for attempt in 1..=attempts {
        match call().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt == attempts {
                    return Err(err);
                }
                tracing::warn!(
                    target: "secondwind::sink",
                    %err,
                    attempt,
                    "sink delivery failed; redelivering"
                );
                tokio::time::sleep(full_jitter(delay)).await;
                delay = delay.saturating_mul(2).min(policy.max_delay);
            }
        }
    }
    debug_assert!(false, "delivery loop should have returned on the final attempt");
    unreachable!()
}

/// Uniform random duration in `[0, delay]`.
fn full_jitter(delay: Duration) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return delay;
    }
    Duration::from_millis(rng().random_range(0..=millis))
}

/// A sink that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn fire_event(&self, _id: &ExecutionId, _event_name: &str) -> Result<(), SinkError> {
        Ok(())
    }

    async fn failed(&self, _id: &ExecutionId) -> Result<(), SinkError> {
        Ok(())
    }

    async fn block(&self, _id: &ExecutionId) -> Result<(), SinkError> {
        Ok(())
    }

    async fn unblock(&self, _id: &ExecutionId) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A sink that logs every notification via `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn fire_event(&self, id: &ExecutionId, event_name: &str) -> Result<(), SinkError> {
        tracing::info!(target: "secondwind::sink", %id, event = event_name, "event fired");
        Ok(())
    }

    async fn failed(&self, id: &ExecutionId) -> Result<(), SinkError> {
        tracing::info!(target: "secondwind::sink", %id, "execution failed");
        Ok(())
    }

    async fn block(&self, id: &ExecutionId) -> Result<(), SinkError> {
        tracing::info!(target: "secondwind::sink", %id, "execution blocked");
        Ok(())
    }

    async fn unblock(&self, id: &ExecutionId) -> Result<(), SinkError> {
        tracing::info!(target: "secondwind::sink", %id, "execution unblocked");
        Ok(())
    }
}

/// One notification recorded by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    EventFired { id: ExecutionId, event: String },
    Failed { id: ExecutionId },
    Blocked { id: ExecutionId },
    Unblocked { id: ExecutionId },
}

/// A sink that records notifications in memory, with optional failure
/// injection for exercising the delivery retry path.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    failures_remaining: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in delivery order.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().expect("memory sink poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().expect("memory sink poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().expect("memory sink poisoned").is_empty()
    }

    /// Make the next `n` deliveries (of any kind) fail without recording.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn record(&self, call: SinkCall) -> Result<(), SinkError> {
        if self.take_failure() {
            return Err(SinkError::Delivery("injected sink failure".into()));
        }
        self.calls.lock().expect("memory sink poisoned").push(call);
        Ok(())
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn fire_event(&self, id: &ExecutionId, event_name: &str) -> Result<(), SinkError> {
        self.record(SinkCall::EventFired { id: id.clone(), event: event_name.to_string() })
    }

    async fn failed(&self, id: &ExecutionId) -> Result<(), SinkError> {
        self.record(SinkCall::Failed { id: id.clone() })
    }

    async fn block(&self, id: &ExecutionId) -> Result<(), SinkError> {
        self.record(SinkCall::Blocked { id: id.clone() })
    }

    async fn unblock(&self, id: &ExecutionId) -> Result<(), SinkError> {
        self.record(SinkCall::Unblocked { id: id.clone() })
    }
}
