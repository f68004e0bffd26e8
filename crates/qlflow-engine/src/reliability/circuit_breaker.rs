//! Per-target circuit breaker
//!
//! Suppresses calls to a failing dependency. State machine:
//!
//! ```text
//! ┌─────────┐ consecutive failures ┌─────────┐     cooldown     ┌──────────┐
//! │ Closed  │ ───────────────────► │  Open   │ ───────────────► │ HalfOpen │
//! └─────────┘                      └─────────┘                  └──────────┘
//!      ▲                                ▲                             │
//!      │     N consecutive probe        │     any probe failure       │
//!      └────────── successes ───────────┴─────────────────────────────┘
//! ```

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use qlflow_core::config::CircuitConfig;
use serde::{Deserialize, Serialize};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, calls admitted
    Closed,

    /// Failure threshold exceeded, calls rejected
    Open,

    /// Cooldown elapsed, probes admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Admission decision for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call admitted
    Admit,

    /// Circuit half-open, call admitted as a probe
    Probe,

    /// Circuit open, call rejected
    Reject,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
    last_transition: Instant,
}

/// Process-local circuit breaker for one (activity, provider) or one
/// target service
///
/// Thread-safe; the lock is held only over constant-time updates.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
                last_transition: Instant::now(),
            }),
        }
    }

    /// Current state, promoting Open to HalfOpen when the cooldown has
    /// elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Decide whether a call may proceed
    ///
    /// Returns [`Admission::Probe`] in half-open state; the caller applies
    /// the configured probe probability.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => Admission::Admit,
            CircuitState::HalfOpen => Admission::Probe,
            CircuitState::Open => Admission::Reject,
        }
    }

    /// Record a successful call
    ///
    /// Returns the (from, to) transition if the state changed.
    pub fn on_success(&self) -> Option<(CircuitState, CircuitState)> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.consecutive_failures = 0;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.halfopen_successes {
                    Some(self.transition(&mut inner, CircuitState::Closed))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Record a failed call
    ///
    /// Returns the (from, to) transition if the state changed.
    pub fn on_failure(&self) -> Option<(CircuitState, CircuitState)> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    Some(self.transition(&mut inner, CircuitState::Open))
                } else {
                    None
                }
            }
            // Any probe failure re-opens
            CircuitState::HalfOpen => Some(self.transition(&mut inner, CircuitState::Open)),
            CircuitState::Open => None,
        }
    }

    /// Consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Time since the last state change
    pub fn since_last_transition(&self) -> Duration {
        self.inner.lock().last_transition.elapsed()
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            let cooldown = Duration::from_millis(self.config.cooldown_ms);
            if inner.opened_at.map(|t| t.elapsed() >= cooldown).unwrap_or(false) {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn transition(
        &self,
        inner: &mut BreakerInner,
        to: CircuitState,
    ) -> (CircuitState, CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition = Instant::now();
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.probe_successes = 0;
            }
            CircuitState::HalfOpen => {
                inner.probe_successes = 0;
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.consecutive_failures = 0;
                inner.probe_successes = 0;
            }
        }
        (from, to)
    }
}
