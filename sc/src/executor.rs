//! Retry wrapper for remote calls
//!
//! Rate-limited calls rotate to another credential and back off
//! exponentially; anything else is surfaced immediately.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::credentials::{Credential, CredentialPool};
use crate::error::{CacheError, Result};
use crate::remote::RemoteError;

/// Default number of attempts per operation
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay; attempt `n` waits `base * 2^n`
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Runs remote operations with credential rotation and exponential backoff
#[derive(Debug)]
pub struct RateLimitedExecutor {
    pool: Arc<CredentialPool>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl RateLimitedExecutor {
    pub fn new(pool: Arc<CredentialPool>) -> Self {
        Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry that follows `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Execute `operation`, retrying rate-limited failures on a fresh credential
    pub fn execute<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(&Credential) -> std::result::Result<T, RemoteError>,
    {
        let mut credential = self.pool.current();

        for attempt in 0..self.max_attempts {
            let err = match operation(&credential) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_rate_limit() {
                error!(error = %err, "Remote error (non-rate-limit)");
                return Err(CacheError::Remote(err));
            }

            warn!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                error = %err,
                "Rate limit error"
            );

            if attempt + 1 >= self.max_attempts {
                error!("Max attempts reached, giving up");
                return Err(CacheError::RateLimited {
                    attempts: self.max_attempts,
                    source: err,
                });
            }

            credential = self.pool.rotate(&credential);
            let wait = self.backoff(attempt);
            info!(wait_ms = wait.as_millis() as u64, "Waiting before retry");
            thread::sleep(wait);
        }

        // max_attempts is at least 1, so the loop always returns
        debug!("execute: attempt loop exhausted");
        Err(CacheError::Config("executor configured with zero attempts".to_string()))
    }
}
