//! Structured retry events.
//!
//! The combinator describes each decision it takes as a [`RetryOnEvent`] and logs it through
//! `tracing` at `debug` level under the `retry_on_event` message. Events are diagnostic only: they
//! never change what is delivered downstream.

use std::fmt;

/// Decisions taken by a [`RetryOn`](crate::RetryOn) stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOnEvent {
    /// A failure did not match the target and was forwarded.
    Unmatched {
        /// The attempt that failed (1-indexed).
        attempt: usize,
    },
    /// The target failure occurred with no retries left and was forwarded.
    Exhausted {
        /// Total source subscriptions made.
        attempts: usize,
    },
    /// The recovery producer was started ahead of a retry.
    Recovering {
        /// The attempt that failed (1-indexed).
        attempt: usize,
    },
    /// The recovery producer failed; its failure was forwarded.
    RecoveryFailed {
        /// The attempt whose retry was abandoned (1-indexed).
        attempt: usize,
    },
    /// The source was subscribed to again.
    Resubscribed {
        /// The new attempt (1-indexed).
        attempt: usize,
        /// Retries left after this one.
        remaining: usize,
    },
}

impl fmt::Display for RetryOnEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOnEvent::Unmatched { attempt } => write!(f, "Unmatched(#{})", attempt),
            RetryOnEvent::Exhausted { attempts } => write!(f, "Exhausted(attempts={})", attempts),
            RetryOnEvent::Recovering { attempt } => write!(f, "Recovering(#{})", attempt),
            RetryOnEvent::RecoveryFailed { attempt } => write!(f, "RecoveryFailed(#{})", attempt),
            RetryOnEvent::Resubscribed { attempt, remaining } => {
                write!(f, "Resubscribed(#{}, remaining={})", attempt, remaining)
            }
        }
    }
}

pub(crate) fn emit(event: RetryOnEvent) {
    tracing::debug!(event = %event, "retry_on_event");
}
