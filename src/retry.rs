//! Shared HTTP resilience: one error taxonomy and one backoff policy used by
//! both the embedder client and the vector index client.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Classified transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed")]
    ConnectionFailed,

    #[error("HTTP status {0}: {1}")]
    Status(u16, String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Worth retrying with backoff: timeouts, connection failures, 429, 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::ConnectionFailed => true,
            TransportError::Status(code, _) => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// The instance itself is unreachable; failover to another makes sense.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::ConnectionFailed
        )
    }
}

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            cap: Duration::from_millis(4000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, scaled by a jitter uniform in [0.85, 1.15]
    /// so a fleet of clients does not retry in lockstep, capped at `cap`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.85..=1.15);
        let exp = self.base_delay.as_millis() as f64
            * 2f64.powi(attempt.saturating_sub(1).min(16) as i32)
            * jitter;
        Duration::from_millis((exp as u64).min(self.cap.as_millis() as u64))
    }

    /// Run `op`, retrying transient failures up to `max_attempts` times.
    /// Permanent failures surface immediately.
    pub fn run<T>(
        &self,
        mut op: impl FnMut() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            cap: Duration::from_millis(8),
        }
    }

    #[test]
    fn classification() {
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::ConnectionFailed.is_transient());
        assert!(TransportError::Status(429, String::new()).is_transient());
        assert!(TransportError::Status(503, String::new()).is_transient());
        assert!(!TransportError::Status(400, String::new()).is_transient());
        assert!(!TransportError::Status(404, String::new()).is_transient());
        assert!(!TransportError::Malformed("x".into()).is_transient());

        assert!(TransportError::Timeout.is_unreachable());
        assert!(!TransportError::Status(500, String::new()).is_unreachable());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            cap: Duration::from_millis(1000),
        };

        for _ in 0..20 {
            let d1 = policy.backoff_delay(1).as_millis() as f64;
            assert!((85.0..=115.0).contains(&d1), "d1 = {d1}");

            let d2 = policy.backoff_delay(2).as_millis() as f64;
            assert!((170.0..=230.0).contains(&d2), "d2 = {d2}");

            // attempt 6 would be 3200ms before the cap
            assert!(policy.backoff_delay(6) <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn retries_transient_until_success() {
        let mut calls = 0;
        let result = fast_policy(3).run(|| {
            calls += 1;
            if calls < 3 {
                Err(TransportError::Timeout)
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_attempts_on_persistent_transient() {
        let mut calls = 0;
        let result: Result<(), _> = fast_policy(3).run(|| {
            calls += 1;
            Err(TransportError::Status(500, "boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = fast_policy(5).run(|| {
            calls += 1;
            Err(TransportError::Status(400, "bad request".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
