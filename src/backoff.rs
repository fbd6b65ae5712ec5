//! Pure backoff curve for retry scheduling.
//!
//! Computes the delay armed before the nth retry of a failing execution:
//! `min(initial_delay * backoff_factor^attempt, max_delay)`. Attempt `0` is
//! the delay before the *first* retry (the second overall attempt) and yields
//! exactly `initial_delay`. The curve is deterministic, monotonically
//! non-decreasing in `attempt`, and bounded by `max_delay`.
//!
//! Overflow behavior: intermediate products that overflow `f64` or exceed the
//! cap clamp to `max_delay`; there is no panic path. Inputs are pre-validated
//! by [`FailureStrategy::new`](crate::FailureStrategy::new), so this module
//! has no error conditions of its own.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use secondwind::{backoff, ExhaustionAction, FailureStrategy};
//!
//! let strategy = FailureStrategy::new(
//!     Duration::from_millis(100),
//!     2.0,
//!     Duration::from_secs(100),
//!     Duration::from_secs(86_400),
//!     ExhaustionAction::Fail,
//! )
//! .unwrap();
//! assert_eq!(backoff::delay_for_attempt(&strategy, 0), Duration::from_millis(100));
//! assert_eq!(backoff::delay_for_attempt(&strategy, 1), Duration::from_millis(200));
//! assert_eq!(backoff::delay_for_attempt(&strategy, 20), Duration::from_secs(100)); // capped
//! ```

use std::time::Duration;

use crate::strategy::FailureStrategy;

/// Delay to arm before retry number `attempt` (0-based).
pub fn delay_for_attempt(strategy: &FailureStrategy, attempt: u32) -> Duration {
    if attempt == 0 {
        return strategy.initial_delay();
    }

    let max_secs = strategy.max_delay().as_secs_f64();
    let exponent = attempt.min(i32::MAX as u32) as i32;
    let raw = strategy.initial_delay().as_secs_f64() * strategy.backoff_factor().powi(exponent);

    if !raw.is_finite() || raw < 0.0 || raw > max_secs {
        strategy.max_delay()
    } else {
        Duration::from_secs_f64(raw)
    }
}
