//! Bounded retry with linearly growing backoff.
//!
//! Every store request builds its own [`RetryBudget`] from the shared
//! [`RetryPolicy`]. Budgets are never shared between requests or workers, so
//! one exhausted request cannot starve the next.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::cloud::status::StoreStatus;
use crate::constants::{DEFAULT_BACKOFF_STEP, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS};

/// Smallest backoff growth; keeps intervals strictly increasing.
const MIN_BACKOFF_STEP: Duration = Duration::from_millis(1);

/// Immutable retry settings shared by all workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one
    pub max_attempts: u32,
    /// Sleep before the first retry
    pub initial_backoff: Duration,
    /// Added to the sleep after every retry
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, initial: Duration, step: Duration) -> Self {
        self.initial_backoff = initial;
        self.backoff_step = step.max(MIN_BACKOFF_STEP);
        self
    }

    /// Start a fresh budget for one logical request.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            remaining: self.max_attempts.max(1),
            attempts: 0,
            next_backoff: self.initial_backoff,
            step: self.backoff_step.max(MIN_BACKOFF_STEP),
            slept: Vec::new(),
        }
    }
}

/// Attempt counter and backoff state for a single request.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: u32,
    attempts: u32,
    next_backoff: Duration,
    step: Duration,
    slept: Vec<Duration>,
}

impl RetryBudget {
    /// Consume one attempt. Returns the 1-based attempt number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.attempts += 1;
        self.attempts
    }

    /// Decide whether to retry after `status`, sleeping the backoff if so.
    pub fn should_retry(&mut self, status: StoreStatus) -> bool {
        if !status.is_retryable() || self.remaining == 0 {
            return false;
        }

        let delay = self.next_backoff;
        debug!("Retrying after {} in {:?} ({} attempts left)", status, delay, self.remaining);
        thread::sleep(delay);

        self.slept.push(delay);
        self.next_backoff += self.step;
        true
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Backoff intervals slept so far, in order.
    pub fn backoffs(&self) -> &[Duration] {
        &self.slept
    }

    pub fn into_backoffs(self) -> Vec<Duration> {
        self.slept
    }
}
