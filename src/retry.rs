use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::config::RetrySettings;
use crate::error::{Error, Result};

/// Bounded retry with exponential backoff: `base * 2^attempt` between tries.
#[derive(Debug, Clone)]
pub struct Backoff {
    max_retries: u32,
    base_backoff_ms: u64,
}

impl Backoff {
    pub fn new(max_retries: u32, base_backoff_ms: u64) -> Self {
        Backoff {
            max_retries,
            base_backoff_ms,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Backoff::new(settings.max_retries, settings.base_backoff_ms)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(2u64.saturating_pow(attempt)))
    }

    /// Run `op`, retrying transient failures. The last error is returned once
    /// retries run out; permanent errors return immediately.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    let backoff = self.delay(attempt);
                    warn!(
                        "{} failed: {} (attempt {}/{}), backing off {:.1}s",
                        what,
                        e,
                        attempt + 1,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Rate limiting, server errors and network hiccups are worth retrying;
/// a 404 or a malformed body is not.
pub fn is_transient(err: &Error) -> bool {
    match err {
        Error::Status { status, .. } => *status == 429 || *status >= 500,
        Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        Error::Io(_) => true,
        _ => false,
    }
}

/// Opens after `threshold` consecutive failures; a success closes it again.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        CircuitBreaker {
            threshold,
            consecutive: 0,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        CircuitBreaker::new(settings.breaker_threshold)
    }

    pub fn is_open(&self) -> bool {
        self.threshold > 0 && self.consecutive >= self.threshold
    }

    /// `Err(CircuitOpen)` while open, so callers can skip the unit.
    pub fn check(&self) -> Result<()> {
        if self.is_open() {
            Err(Error::CircuitOpen(self.consecutive))
        } else {
            Ok(())
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.is_open() && self.consecutive == self.threshold {
            warn!("circuit opened after {} consecutive failures", self.consecutive);
        }
    }
}
