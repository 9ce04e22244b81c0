use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use super::ExchangeError;
use crate::clock::Clock;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerState {
    pub failure_count: u32,
    pub open: bool,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Process-wide breaker shared by every exchange call. Construct one and hand
/// the same `Arc` to each client that talks to the same exchange.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits a call, or rejects it without I/O while the circuit is open.
    /// Once the cooldown has passed since the last failure the breaker closes
    /// and the call goes through.
    pub fn try_acquire(&self) -> Result<(), ExchangeError> {
        let mut state = self.state();
        if !state.open {
            return Ok(());
        }

        let now = self.clock.now();
        let reopen_at = state
            .last_failure_time
            .map(|t| t + self.config.cooldown)
            .unwrap_or(now);
        if now >= reopen_at {
            *state = BreakerState::default();
            tracing::info!("Exchange circuit breaker cooled down, closing");
            return Ok(());
        }

        Err(ExchangeError::CircuitBreakerOpen(format!(
            "exchange calls suspended until {}",
            reopen_at.to_rfc3339()
        )))
    }

    pub fn record_success(&self) {
        let mut state = self.state();
        state.failure_count = 0;
        state.open = false;
    }

    pub fn record_failure(&self) {
        let mut state = self.state();
        state.failure_count += 1;
        state.last_failure_time = Some(self.clock.now());
        if !state.open && state.failure_count >= self.config.failure_threshold {
            state.open = true;
            tracing::warn!(
                failure_count = state.failure_count,
                cooldown_secs = self.config.cooldown.num_seconds(),
                "Exchange circuit breaker opened"
            );
        }
    }

    pub fn snapshot(&self) -> BreakerState {
        *self.state()
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> &'static str {
        if self.snapshot().open {
            "open"
        } else {
            "closed"
        }
    }
}
