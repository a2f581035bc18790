use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollPolicy {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            max_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// Growing poll interval, capped at `max_ms`.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    policy: PollPolicy,
    current_ms: u64,
}

impl PollBackoff {
    pub fn new(policy: PollPolicy) -> Self {
        let initial_ms = policy.initial_ms.max(1).min(policy.max_ms.max(1));
        Self {
            policy,
            current_ms: initial_ms,
        }
    }

    /// Returns the delay to wait now and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_ms;
        let multiplier = if self.policy.multiplier.is_finite() && self.policy.multiplier >= 1.0 {
            self.policy.multiplier
        } else {
            1.0
        };
        let grown = (delay as f64 * multiplier).ceil() as u64;
        self.current_ms = grown.clamp(1, self.policy.max_ms.max(1));
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.policy);
    }
}
