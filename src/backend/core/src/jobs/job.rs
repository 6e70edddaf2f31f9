//! Job handler abstractions.
//!
//! This module provides the pieces a queue consumer is built from:
//!
//! - **JobHandler trait**: The interface every queue consumer implements
//! - **JobError**: Failure of a single delivery, retryable or fatal
//! - **RetryPolicy**: Configuration for retry behavior with backoff strategies

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::QueuedJob;
use crate::error::MonitraError;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<MonitraError> for JobError {
    fn from(error: MonitraError) -> Self {
        let message = match error.internal_message() {
            Some(internal) => format!("{}: {}", error.user_message(), internal),
            None => error.user_message().to_string(),
        };
        Self {
            message,
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
        }
    }
}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        delay_secs: u64,
    },
    /// Exponential increase in delay (initial * multiplier^attempt)
    Exponential {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
    },
    /// Exponential with random jitter
    ExponentialWithJitter {
        initial_delay_secs: u64,
        max_delay_secs: u64,
        multiplier: f64,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay_secs: 1,
            max_delay_secs: 30,
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given retry number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = match self {
            Self::Fixed { delay_secs } => *delay_secs as f64,
            Self::Exponential {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
            } => {
                let delay = (*initial_delay_secs as f64) * multiplier.powi(attempt as i32);
                delay.min(*max_delay_secs as f64)
            }
            Self::ExponentialWithJitter {
                initial_delay_secs,
                max_delay_secs,
                multiplier,
                jitter_factor,
            } => {
                let base_delay = (*initial_delay_secs as f64) * multiplier.powi(attempt as i32);
                let capped_delay = base_delay.min(*max_delay_secs as f64);
                // delay * (1 +/- jitter_factor * random)
                let jitter_range = capped_delay * jitter_factor;
                let jitter = rand::thread_rng().gen_range(-1.0..=1.0) * jitter_range;
                (capped_delay + jitter).max(0.0)
            }
        };

        Duration::from_secs_f64(secs)
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay_secs: u64) -> Self {
        Self::Fixed { delay_secs }
    }

    /// Exponential backoff: 1s, 2s, 4s, ... capped at 30s.
    pub fn exponential() -> Self {
        Self::default()
    }

    /// Create an exponential backoff with jitter.
    pub fn exponential_with_jitter() -> Self {
        Self::ExponentialWithJitter {
            initial_delay_secs: 1,
            max_delay_secs: 30,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for job retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total delivery attempts allowed (0 or 1 = never retried)
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Whether to retry on any error or only retryable errors
    pub retry_on_any_error: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            retry_on_any_error: false,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a single delivery.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with a specific number of attempts.
    pub fn with_retries(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check if another delivery should be attempted after `attempts` deliveries failed.
    pub fn should_retry(&self, attempts: u32, error: &JobError) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }

        self.retry_on_any_error || error.retryable
    }

    /// Get the delay before the next delivery, given the deliveries so far.
    pub fn next_retry_delay(&self, attempts: u32) -> Duration {
        self.backoff.delay_for_attempt(attempts.saturating_sub(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handler Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Consumer of one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Returns the name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handle one delivery.
    ///
    /// # Errors
    ///
    /// Return `JobError::retryable()` for transient failures that should be
    /// redelivered after a backoff, and `JobError::fatal()` for permanent ones.
    async fn handle(&self, job: &QueuedJob) -> JobResult;

    /// Returns the retry policy for this queue.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
