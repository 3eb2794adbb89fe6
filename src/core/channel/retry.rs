// src/core/channel/retry.rs

//! Per-destination retry policy (§4.8 "Retry policy").

use std::time::Duration;

/// What a destination worker should do after one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The send succeeded (or the response validator accepted it); stop.
    Halt,
    /// Re-queue after `delay`, attempts remain.
    Requeue { delay: Duration },
    /// Retries are exhausted; the connector-message is terminally ERROR.
    Exhausted,
}

/// `retryCount`, `retryInterval`, `rotate`, `sendFirst` as configured on one
/// destination.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_interval: Duration,
    /// On failure, move the item to the tail of the queue instead of the
    /// head, so other pending items aren't starved behind a failing one.
    pub rotate: bool,
    /// Attempt a send once, inline, before ever placing the item on the
    /// queue at all.
    pub send_first: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_count: 0,
            retry_interval: Duration::from_secs(5),
            rotate: false,
            send_first: false,
        }
    }
}

impl RetryPolicy {
    /// Decides the next step after attempt number `attempt` (1-based) has
    /// failed. A `sent` outcome is handled by the caller directly as `Halt`
    /// before this is ever consulted.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt <= self.retry_count {
            RetryDecision::Requeue {
                delay: self.retry_interval,
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}
