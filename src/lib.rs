#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Second Wind 🌬️
//!
//! Retry scheduling for failing workflow task executions: exponential
//! backoff with a capped inter-retry delay, a wall-clock deadline measured
//! from the first failure, and block-on-exhaustion escalation that halts
//! dependent work until an operator steps in.
//!
//! ## Features
//!
//! - **Validated failure policies**: immutable [`FailureStrategy`] values,
//!   checked once at construction and shared read-only across executions
//! - **Deterministic backoff curve** bounded by a delay cap
//! - **Deadline-only termination**: the wall-clock budget is the sole
//!   stopping condition; there is no retry-count cap
//! - **One timer heap, one worker**: thousands of concurrently retrying
//!   executions share a single time-ordered heap and sleeper
//! - **At-most-once escalation** with bounded, jittered redelivery to the
//!   event sink
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use secondwind::{
//!     ExecutionId, ExhaustionAction, FailureStrategy, NullSink, RetryScheduler, TaskDispatcher,
//! };
//!
//! #[derive(Debug)]
//! struct EnqueueDispatcher;
//!
//! #[async_trait::async_trait]
//! impl TaskDispatcher for EnqueueDispatcher {
//!     async fn redispatch(&self, id: &ExecutionId, attempt: u32) {
//!         println!("re-running {id} (retry {attempt})");
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let strategy = FailureStrategy::new(
//!     Duration::from_millis(100),
//!     2.0,
//!     Duration::from_secs(100),
//!     Duration::from_secs(24 * 60 * 60),
//!     ExhaustionAction::FireEventAndBlock("RetriesExhausted".into()),
//! )
//! .unwrap();
//!
//! let scheduler = RetryScheduler::new(Arc::new(EnqueueDispatcher), Arc::new(NullSink));
//! let id = ExecutionId::from("order-17/ShipOrder");
//! scheduler.on_failure(&id, &strategy, tokio::time::Instant::now()).await;
//! # });
//! ```

pub mod backoff;
pub mod deadline;
pub mod dispatch;
pub mod scheduler;
pub mod sink;
pub mod state;
pub mod strategy;

// Re-exports
pub use dispatch::TaskDispatcher;
pub use scheduler::RetryScheduler;
pub use sink::{EventSink, LogSink, MemorySink, NullSink, SinkCall, SinkError, SinkRetryPolicy};
pub use state::{ExecutionId, RetryStatus};
pub use strategy::{ExhaustionAction, FailureStrategy, StrategyError};
