//! Retry engine: exponential backoff with jitter for failed inference calls.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use ultravision_core::{InferenceError, RetryClass};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum number of attempts per batch, first attempt included.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier for each subsequent wait (exponential factor).
    pub backoff_factor: f64,
    /// Maximum delay cap in milliseconds, before jitter.
    pub max_delay_ms: u64,
    /// Add up to 25% random jitter on top of the computed delay.
    pub jitter: bool,
    /// Rate-limited attempts wait this many times longer.
    pub rate_limit_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            backoff_factor: 1.7,
            max_delay_ms: 25_000,
            jitter: true,
            rate_limit_multiplier: 4.0,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay after failed attempt `attempt_number` (1-indexed),
    /// capped, without jitter.
    pub fn backoff(&self, attempt_number: u32) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.base_delay_ms as f64
            * self.backoff_factor.powi((attempt_number - 1) as i32);
        Duration::from_millis(delay_ms.min(self.max_delay_ms as f64) as u64)
    }

    /// Longest a rate-limited attempt will wait, whatever the server asks for.
    pub fn rate_limit_ceiling(&self) -> Duration {
        Duration::from_millis((self.max_delay_ms as f64 * self.rate_limit_multiplier.max(1.0)) as u64)
    }

    /// Delay to wait before the next attempt after a failure of class `class`.
    ///
    /// Jitter only ever adds time, so the result is never below `backoff`.
    /// A server `Retry-After` hint is honored up to [`Self::rate_limit_ceiling`].
    pub fn delay_for(&self, attempt_number: u32, class: RetryClass, retry_after: Option<Duration>) -> Duration {
        let mut delay = self.backoff(attempt_number);
        if class == RetryClass::RateLimited {
            let ceiling = self.rate_limit_ceiling();
            // Float to int casts saturate, so a huge multiplier cannot panic here.
            let scaled = Duration::from_millis((delay.as_millis() as f64 * self.rate_limit_multiplier.max(1.0)) as u64);
            delay = scaled.min(ceiling);
            if let Some(server_hint) = retry_after {
                delay = delay.max(server_hint.min(ceiling));
            }
        }
        if self.jitter {
            let max_jitter = u64::try_from(delay.as_millis() / 4).unwrap_or(u64::MAX);
            if max_jitter > 0 {
                let extra = rand::thread_rng().gen_range(0..=max_jitter);
                delay = delay.saturating_add(Duration::from_millis(extra));
            }
        }
        delay
    }

    pub fn should_retry(&self, attempt_number: u32) -> bool {
        attempt_number < self.max_attempts
    }
}

/// Retry bookkeeping for one batch; lives only while that batch is in flight.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<String>,
    pub next_delay: Option<Duration>,
    pub exhausted: bool,
}

impl RetryState {
    /// Record a failed attempt. Returns the delay before the next attempt, or
    /// `None` when the batch should be given up.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: &InferenceError) -> Option<Duration> {
        self.attempt += 1;
        self.last_error = Some(error.to_string());

        let class = error.class();
        if class == RetryClass::NonRetryable || !policy.should_retry(self.attempt) {
            self.exhausted = true;
            self.next_delay = None;
            warn!(
                attempt = self.attempt,
                max = policy.max_attempts,
                retryable = class != RetryClass::NonRetryable,
                "Batch retry policy exhausted"
            );
            return None;
        }

        let delay = policy.delay_for(self.attempt, class, error.retry_after());
        self.next_delay = Some(delay);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> InferenceError {
        InferenceError::ServerError { status: Some(503), message: "busy".into() }
    }

    #[test]
    fn exponential_backoff_grows() {
        let policy = RetryPolicy { jitter: false, ..Default::default() };
        let d1 = policy.backoff(1).as_millis();
        let d2 = policy.backoff(2).as_millis();
        let d3 = policy.backoff(3).as_millis();
        assert_eq!(d1, 1_000);
        assert_eq!(d2, 1_700);
        assert!(d3 > d2, "delay should grow: {d2} < {d3}");
    }

    #[test]
    fn respects_max_delay() {
        let policy = RetryPolicy {
            max_delay_ms: 5_000,
            jitter: false,
            ..Default::default()
        };
        let d10 = policy.backoff(10).as_millis();
        assert_eq!(d10, 5_000);
    }

    #[test]
    fn jitter_never_shortens_the_delay() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            let base = policy.backoff(attempt);
            let jittered = policy.delay_for(attempt, RetryClass::Transient, None);
            assert!(jittered >= base);
            assert!(jittered <= base + base / 4 + Duration::from_millis(1));
        }
    }

    #[test]
    fn rate_limits_wait_longer() {
        let policy = RetryPolicy { jitter: false, ..Default::default() };
        let normal = policy.delay_for(1, RetryClass::Transient, None);
        let limited = policy.delay_for(1, RetryClass::RateLimited, None);
        assert_eq!(limited, normal * 4);
        let hinted = policy.delay_for(1, RetryClass::RateLimited, Some(Duration::from_secs(30)));
        assert_eq!(hinted, Duration::from_secs(30));
    }

    #[test]
    fn server_hints_are_capped() {
        let policy = RetryPolicy::default();
        let ceiling = policy.rate_limit_ceiling();
        assert_eq!(ceiling, Duration::from_secs(100));

        let huge = Some(Duration::from_secs(u64::MAX));
        let delay = policy.delay_for(1, RetryClass::RateLimited, huge);
        assert!(delay >= ceiling);
        assert!(delay <= ceiling + ceiling / 4 + Duration::from_millis(1));

        let day = Some(Duration::from_secs(86_400));
        let strict = RetryPolicy { jitter: false, ..Default::default() };
        assert_eq!(strict.delay_for(3, RetryClass::RateLimited, day), ceiling);
    }

    #[test]
    fn extreme_multiplier_does_not_overflow() {
        let policy = RetryPolicy { rate_limit_multiplier: f64::MAX, ..Default::default() };
        let delay = policy.delay_for(5, RetryClass::RateLimited, Some(Duration::from_secs(u64::MAX)));
        assert!(delay >= policy.rate_limit_ceiling());
    }

    #[test]
    fn exhaustion_after_max_attempts() {
        let policy = RetryPolicy { max_attempts: 2, jitter: false, ..Default::default() };
        let mut state = RetryState::default();
        assert!(state.record_failure(&policy, &transient()).is_some());
        assert!(state.record_failure(&policy, &transient()).is_none());
        assert!(state.exhausted);
        assert_eq!(state.attempt, 2);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        let err = InferenceError::ClientError { status: Some(400), message: "bad".into() };
        assert!(state.record_failure(&policy, &err).is_none());
        assert_eq!(state.attempt, 1);
        assert!(state.last_error.unwrap().contains("bad"));
    }
}
