//! Re-dispatch seam to the surrounding task-execution engine.

use std::fmt;

use async_trait::async_trait;

use crate::state::ExecutionId;

/// External collaborator that re-runs a task execution when its retry timer
/// fires.
///
/// `redispatch` should hand the execution off promptly (enqueue, spawn); the
/// outcome of the re-run flows back to the scheduler later through
/// `on_failure`/`on_success`. `attempt` is the 1-based count of retries
/// dispatched so far for this retry-state lifetime.
#[async_trait]
pub trait TaskDispatcher: Send + Sync + fmt::Debug {
    async fn redispatch(&self, id: &ExecutionId, attempt: u32);
}
