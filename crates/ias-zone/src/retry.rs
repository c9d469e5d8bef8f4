//! Retry/backoff controller shared by the whole status queue.
//!
//! One controller per device, not per entry: the head of the queue is the
//! only thing ever retried. Backoff grows multiplicatively and is capped;
//! arithmetic is done in u64 so `current * ratio` cannot wrap.
use serde::{Deserialize, Serialize};

use crate::error::ZoneError;

/// Hard ceiling on any configured backoff: 12 hours.
pub const MAX_BACKOFF_CEILING_SECS: u32 = 12 * 60 * 60;

/// Retry policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub first_backoff_secs: u32,
    pub backoff_ratio: u32,
    pub max_backoff_secs: u32,
    pub unlimited_retries: bool,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first_backoff_secs: 3,
            backoff_ratio: 2,
            max_backoff_secs: 12,
            unlimited_retries: false,
            max_attempts: 10,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ZoneError> {
        if self.first_backoff_secs == 0 {
            return Err(ZoneError::invalid("first backoff must be > 0"));
        }
        if self.backoff_ratio == 0 {
            return Err(ZoneError::invalid("backoff ratio must be > 0"));
        }
        if self.max_backoff_secs < self.first_backoff_secs {
            return Err(ZoneError::invalid(format!(
                "max backoff {}s is below first backoff {}s",
                self.max_backoff_secs, self.first_backoff_secs
            )));
        }
        if self.max_backoff_secs > MAX_BACKOFF_CEILING_SECS {
            return Err(ZoneError::invalid(format!(
                "max backoff {}s exceeds ceiling {MAX_BACKOFF_CEILING_SECS}s",
                self.max_backoff_secs
            )));
        }
        if self.max_attempts == 0 {
            return Err(ZoneError::invalid("max attempts must be > 0"));
        }
        Ok(())
    }
}

/// Point-in-time view of the controller, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub policy: RetryPolicy,
    pub current_backoff_secs: u32,
    pub current_attempt: u32,
}

pub struct RetryController {
    policy: RetryPolicy,
    current_backoff_secs: u32,
    current_attempt: u32,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Result<Self, ZoneError> {
        policy.validate()?;
        Ok(Self {
            current_backoff_secs: policy.first_backoff_secs,
            current_attempt: 0,
            policy,
        })
    }

    /// Replace the policy. On error the previous policy stays in force.
    pub fn configure(&mut self, policy: RetryPolicy) -> Result<(), ZoneError> {
        policy.validate()?;
        self.policy = policy;
        self.reset();
        Ok(())
    }

    /// Current backoff, then advance it for the next call.
    pub fn next_backoff(&mut self) -> u32 {
        let current = self.current_backoff_secs;
        let next = (current as u64) * (self.policy.backoff_ratio as u64);
        self.current_backoff_secs = next.min(self.policy.max_backoff_secs as u64) as u32;
        current
    }

    /// Count a failed attempt. Returns true once the budget is spent.
    pub fn record_attempt(&mut self) -> bool {
        self.current_attempt = self.current_attempt.saturating_add(1);
        !self.policy.unlimited_retries && self.current_attempt >= self.policy.max_attempts
    }

    pub fn reset(&mut self) {
        self.current_backoff_secs = self.policy.first_backoff_secs;
        self.current_attempt = 0;
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn current_backoff_secs(&self) -> u32 {
        self.current_backoff_secs
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn state(&self) -> RetryState {
        RetryState {
            policy: self.policy,
            current_backoff_secs: self.current_backoff_secs,
            current_attempt: self.current_attempt,
        }
    }
}
