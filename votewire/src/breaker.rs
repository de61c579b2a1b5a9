use std::time::{Duration, Instant};

use log::{info, warn};

/// Circuit-breaker tuning. The defaults are the production values; tests
/// compress them.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive transport failures before the circuit opens.
    pub failure_threshold: u32,
    /// First open interval; doubles on every re-open.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 3,
            initial_backoff: Duration::from_millis(5_000),
            max_backoff: Duration::from_millis(300_000),
        }
    }
}

/// Failure-streak circuit breaker.
///
/// Closed: calls pass through. Open: calls fail fast until the backoff
/// expires; the first call after expiry is the half-open probe. A probe
/// failure re-opens with doubled backoff (capped); any success snaps the
/// breaker fully closed and resets the backoff.
pub struct CircuitBreaker {
    config: BreakerConfig,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    backoff: Duration,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let backoff = config.initial_backoff;
        CircuitBreaker {
            config,
            consecutive_failures: 0,
            open_until: None,
            backoff,
        }
    }

    /// Whether a call may go to the wire right now. Flips the breaker to
    /// half-open when the backoff has expired.
    pub fn call_permitted(&mut self) -> bool {
        match self.open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                info!("circuit breaker probing after {:?} backoff", self.backoff);
                self.open_until = None;
                true
            }
            None => true,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.open_until, Some(until) if Instant::now() < until)
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.backoff = self.config.initial_backoff;
        self.open_until = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.config.failure_threshold {
            warn!(
                "circuit breaker open after {} consecutive failures, retrying in {:?}",
                self.consecutive_failures, self.backoff
            );
            self.open_until = Some(Instant::now() + self.backoff);
            self.backoff = (self.backoff * 2).min(self.config.max_backoff);
        }
    }
}
