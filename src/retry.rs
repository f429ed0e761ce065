//! Bounded retry policy for the recognition boundary.
//!
//! The policy only decides *how often* and *how long to wait*; what a failed
//! attempt means is up to the caller. Every error is treated as transient
//! until the attempt budget is spent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Backoff {
    /// Same delay before every retry. (default)
    #[default]
    Fixed,
    /// `delay * 2^(retry - 1)`: 1×, 2×, 4×, …
    Exponential,
}

/// Maximum attempts plus the wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always ≥ 1.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(2000),
            backoff: Backoff::Fixed,
        }
    }
}

/// The last error once every attempt has failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff,
        }
    }

    /// Delay before attempt number `attempt` (1-based). Zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 2);
                self.delay.saturating_mul(factor)
            }
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. On success the value and
    /// the number of attempts used are returned.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), Exhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if attempt >= max => {
                    warn!("{}: attempt {}/{} failed: {}", label, attempt, max, e);
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let wait = self.delay_before(attempt + 1);
                    warn!(
                        "{}: attempt {}/{} failed: {}; retrying in {}ms",
                        label,
                        attempt,
                        max,
                        e,
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
