//! Failure-handling policy for a task type.
//!
//! A [`FailureStrategy`] is an immutable value describing how the scheduler
//! reacts when executions of one task type fail: retry with a multiplicative
//! backoff curve, clamp every delay to a cap, stop retrying once a wall-clock
//! deadline (measured from the first failure) would be exceeded, and then
//! apply an [`ExhaustionAction`].
//!
//! Strategies are validated once, at construction, through a single checked
//! factory; invalid bounds never reach scheduling time. A constructed value
//! is read-only and safe to share across every concurrent execution of the
//! same task type.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use secondwind::{ExhaustionAction, FailureStrategy};
//!
//! let strategy = FailureStrategy::new(
//!     Duration::from_millis(100),
//!     2.0,
//!     Duration::from_secs(100),
//!     Duration::from_secs(24 * 60 * 60),
//!     ExhaustionAction::FireEventAndBlock("RetriesExhausted".into()),
//! )
//! .unwrap();
//! assert_eq!(strategy.initial_delay(), Duration::from_millis(100));
//! ```

use std::fmt;
use std::time::Duration;

/// What happens when the deadline is reached and no further retry is armed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustionAction {
    /// Fire the named event and let the dependent process graph continue,
    /// using the event as its signal.
    FireEvent(String),
    /// Fire the named event and halt dependent work until an operator
    /// resolves the execution.
    FireEventAndBlock(String),
    /// Report unconditional failure.
    Fail,
}

/// Errors rejected by the [`FailureStrategy`] factory.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyError {
    /// `initial_delay` must be greater than zero.
    ZeroInitialDelay,
    /// `backoff_factor` must be finite and at least 1.0.
    InvalidBackoffFactor { factor: f64 },
    /// `max_delay` must be at least `initial_delay`.
    MaxDelayLessThanInitial { initial: Duration, max: Duration },
    /// `deadline` must be at least `initial_delay`.
    DeadlineLessThanInitial { initial: Duration, deadline: Duration },
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyError::ZeroInitialDelay => {
                write!(f, "initial delay must be greater than zero")
            }
            StrategyError::InvalidBackoffFactor { factor } => {
                write!(f, "backoff factor must be finite and >= 1.0 (got {})", factor)
            }
            StrategyError::MaxDelayLessThanInitial { initial, max } => {
                write!(f, "max delay ({:?}) must be >= initial delay ({:?})", max, initial)
            }
            StrategyError::DeadlineLessThanInitial { initial, deadline } => {
                write!(f, "deadline ({:?}) must be >= initial delay ({:?})", deadline, initial)
            }
        }
    }
}

impl std::error::Error for StrategyError {}

/// Immutable retry policy shared by all executions of one task type.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureStrategy {
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    deadline: Duration,
    exhaustion_action: ExhaustionAction,
}

impl FailureStrategy {
    /// Build a strategy, rejecting invalid bounds.
    ///
    /// Constraints: `initial_delay > 0`, `backoff_factor` finite and
    /// `>= 1.0` (1.0 means constant delay), `max_delay >= initial_delay`,
    /// `deadline >= initial_delay`.
    pub fn new(
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
        deadline: Duration,
        exhaustion_action: ExhaustionAction,
    ) -> Result<Self, StrategyError> {
        if initial_delay.is_zero() {
            return Err(StrategyError::ZeroInitialDelay);
        }
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(StrategyError::InvalidBackoffFactor { factor: backoff_factor });
        }
        if max_delay < initial_delay {
            return Err(StrategyError::MaxDelayLessThanInitial {
                initial: initial_delay,
                max: max_delay,
            });
        }
        if deadline < initial_delay {
            return Err(StrategyError::DeadlineLessThanInitial {
                initial: initial_delay,
                deadline,
            });
        }
        Ok(Self { initial_delay, backoff_factor, max_delay, deadline, exhaustion_action })
    }

    /// Delay before the first retry.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Multiplicative growth applied per retry.
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Upper clamp on any computed delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Total wall-clock retry budget, measured from the first failure.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Action applied once the deadline is exceeded.
    pub fn exhaustion_action(&self) -> &ExhaustionAction {
        &self.exhaustion_action
    }
}
