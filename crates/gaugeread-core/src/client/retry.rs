//! Retry state machine for `VlmClient::ask`.
//!
//! Every provider response is fed to [`RetryState::on_response`], which
//! decides whether to return, back off and retry, or stop. The state holds no
//! clock and does no I/O, so each transition can be tested directly.

use crate::error::ClientError;
use crate::types::ProviderStatus;
use rand::Rng;
use std::time::Duration;

/// Retry budget and backoff parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed for rate-limited and transient failures
    pub max_retries: u32,
    /// First backoff delay
    pub base_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Random extra delay as a fraction of the backoff (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Add up to `jitter * delay` of random delay.
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(factor)
    }
}

/// What the client should do after a response.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// The call succeeded
    Return,
    /// Sleep for `delay`, then try again with a freshly acquired key
    Retry { delay: Duration },
    /// The payload is unusable; stop without retrying
    Fatal,
    /// The retry budget is spent
    Exhausted,
}

/// Progress of one `ask` call.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Provider calls made so far
    pub attempts: u32,
    /// Rate-limited and transient failures so far
    pub transient_failures: u32,
    /// Authentication failures so far (tracked separately from the budget)
    pub auth_failures: u32,
    /// Status of the most recent call
    pub last_status: Option<ProviderStatus>,
    /// Diagnostic text of the most recent failure
    pub last_message: String,
}

impl RetryState {
    /// Advance the state machine with the outcome of one call.
    ///
    /// `pool_size` bounds auth retries: once every key has been rejected
    /// there is no other key left to try.
    pub fn on_response(
        &mut self,
        status: ProviderStatus,
        message: &str,
        policy: &RetryPolicy,
        pool_size: usize,
    ) -> RetryDecision {
        self.attempts += 1;
        self.last_status = Some(status);

        match status {
            ProviderStatus::Success => RetryDecision::Return,
            ProviderStatus::RateLimited | ProviderStatus::TransientError => {
                self.last_message = message.to_string();
                self.transient_failures += 1;
                if self.transient_failures > policy.max_retries {
                    return RetryDecision::Exhausted;
                }
                RetryDecision::Retry {
                    delay: backoff_duration(
                        self.transient_failures - 1,
                        policy.base_backoff,
                        policy.max_backoff,
                    ),
                }
            }
            ProviderStatus::AuthError => {
                self.last_message = message.to_string();
                self.auth_failures += 1;
                if self.auth_failures as usize >= pool_size.max(1) {
                    return RetryDecision::Exhausted;
                }
                // The rejected key is cooling down; the next acquire picks another.
                RetryDecision::Retry {
                    delay: Duration::ZERO,
                }
            }
            ProviderStatus::FatalError => {
                self.last_message = message.to_string();
                RetryDecision::Fatal
            }
        }
    }

    /// Terminal error for an exhausted budget.
    pub fn exhausted_error(&self) -> ClientError {
        ClientError::ExhaustedRetries {
            attempts: self.attempts,
            last_status: self.last_status.unwrap_or(ProviderStatus::TransientError),
            message: self.last_message.clone(),
        }
    }
}

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base * 2^attempt`, capped at `max`.
pub fn backoff_duration(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    base.saturating_mul(factor).min(max)
}
