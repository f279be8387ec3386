//! Circuit breaker: after five consecutive failures the circuit opens
//! for sixty seconds; a half-open probe admits a single request, whose
//! outcome closes or re-opens the circuit.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{BackendError, Result};

/// Consecutive failures before the circuit opens.
pub const FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit rejects calls.
pub const OPEN_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Per-backend breaker. Check before issuing; record after.
pub struct CircuitBreaker {
    backend: String,
    threshold: u32,
    open_for: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(backend: impl Into<String>) -> Self {
        Self::with_policy(backend, FAILURE_THRESHOLD, OPEN_DURATION)
    }

    pub fn with_policy(backend: impl Into<String>, threshold: u32, open_for: Duration) -> Self {
        Self {
            backend: backend.into(),
            threshold: threshold.max(1),
            open_for,
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Admission check. An open circuit rejects without issuing the
    /// call; an elapsed open window admits exactly one probe.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            State::Closed { .. } => Ok(()),
            State::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    debug!(backend = %self.backend, "circuit half-open, admitting probe");
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(())
                } else {
                    Err(BackendError::CircuitOpen {
                        backend: self.backend.clone(),
                        retry_in_secs: (until - now).as_secs().max(1),
                    })
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    Err(BackendError::CircuitOpen {
                        backend: self.backend.clone(),
                        retry_in_secs: 1,
                    })
                } else {
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        *state = State::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match *state {
            State::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.threshold {
                    warn!(backend = %self.backend, failures, "circuit opened");
                    *state = State::Open {
                        until: Instant::now() + self.open_for,
                    };
                } else {
                    *state = State::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            State::HalfOpen { .. } => {
                warn!(backend = %self.backend, "probe failed, circuit re-opened");
                *state = State::Open {
                    until: Instant::now() + self.open_for,
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Open immediately, regardless of the failure count (quota
    /// exhaustion).
    pub fn trip(&self) {
        let mut state = self.state.lock();
        warn!(backend = %self.backend, "circuit tripped open");
        *state = State::Open {
            until: Instant::now() + self.open_for,
        };
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), State::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new("b");
        for _ in 0..FAILURE_THRESHOLD {
            breaker.check().unwrap();
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        assert!(matches!(
            breaker.check(),
            Err(BackendError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("b");
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_half_open_single_probe() {
        let breaker = CircuitBreaker::with_policy("b", 1, Duration::from_millis(0));
        breaker.record_failure();
        // Open window elapsed: the first check admits a probe...
        breaker.check().unwrap();
        // ...but only one at a time.
        assert!(matches!(
            breaker.check(),
            Err(BackendError::CircuitOpen { .. })
        ));

        // Probe success closes the circuit.
        breaker.record_success();
        breaker.check().unwrap();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::with_policy("b", 1, Duration::from_millis(0));
        breaker.record_failure();
        breaker.check().unwrap(); // probe admitted
        breaker.record_failure(); // probe failed
        assert!(breaker.is_open());
    }

    #[test]
    fn test_trip_opens_immediately() {
        let breaker = CircuitBreaker::new("b");
        breaker.trip();
        assert!(breaker.is_open());
    }
}
