//! Reconnect policy for the push connection.
//!
//! ```text
//! Disconnected ──start()──> Connecting ──handshake──> Open
//!                               │                      │
//!                          closure (k ≤ max)      abnormal closure
//!                               ▼                      ▼
//!                          Reconnecting{k} <───────────┘
//!                               │
//!                       closure with k = max
//!                               ▼
//!                             Demo ──start()──> Connecting
//! ```
//!
//! Delays grow linearly: attempt `k` waits `base × k`, with `k` capped at the
//! configured ceiling. A successful handshake resets the counter. The closure that
//! arrives after the last permitted attempt degrades the connector to Demo; no further
//! reconnect timer is scheduled until an explicit `start()`.

use crate::config::FeedConfig;
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay unit; attempt `k` waits `k` units.
    pub base_delay: Duration,
    /// Attempts allowed before degrading to Demo.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Policy from feed settings.
    pub fn from_feed(config: &FeedConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before attempt `attempt` (1-based). Non-decreasing, capped at
    /// `base × max_attempts`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.clamp(1, self.max_attempts.max(1)))
    }

    /// Whether another attempt may be scheduled after `attempts_made` attempts.
    #[must_use]
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// What to do after a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule attempt `attempt` after `delay`.
    Retry {
        /// 1-based attempt number
        attempt: u32,
        /// Wait before reconnecting
        delay: Duration,
    },
    /// Ceiling exceeded: degrade to Demo.
    Exhausted,
}

/// Attempt counter driven by the connector.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Fresh counter.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Register a closure and decide the next step.
    pub fn on_closure(&mut self) -> ReconnectDecision {
        if !self.policy.should_retry(self.attempt) {
            return ReconnectDecision::Exhausted;
        }
        self.attempt += 1;
        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay: self.policy.delay_for_attempt(self.attempt),
        }
    }

    /// Successful handshake or explicit restart.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The policy in use.
    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}
