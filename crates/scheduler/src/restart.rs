//! Restart rate limiting, exponential backoff and a circuit breaker for the
//! supervised process.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Utc},
    serde::Serialize,
    tracing::{info, warn},
};

use crate::clock::Clock;

fn window() -> TimeDelta {
    TimeDelta::hours(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicyConfig {
    /// Restarts allowed within any trailing hour.
    pub max_restarts_per_hour: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed restarts that open the circuit.
    pub circuit_breaker_threshold: u32,
    /// How long the circuit stays open.
    pub circuit_cooldown: Duration,
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            max_restarts_per_hour: 5,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            circuit_breaker_threshold: 3,
            circuit_cooldown: Duration::from_secs(15 * 60),
        }
    }
}

/// Point-in-time view of the policy, for status output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RestartPolicyStatus {
    pub restarts_last_hour: usize,
    pub max_restarts_per_hour: usize,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub next_backoff_seconds: f64,
}

pub struct RestartPolicy {
    config: RestartPolicyConfig,
    clock: Arc<dyn Clock>,
    history: VecDeque<DateTime<Utc>>,
    consecutive_failures: u32,
    circuit_open: bool,
    circuit_open_until: Option<DateTime<Utc>>,
}

impl RestartPolicy {
    pub fn new(config: RestartPolicyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            history: VecDeque::new(),
            consecutive_failures: 0,
            circuit_open: false,
            circuit_open_until: None,
        }
    }

    pub fn config(&self) -> &RestartPolicyConfig {
        &self.config
    }

    /// Whether a restart may be attempted now.
    ///
    /// Closes an expired circuit (resetting the failure count) and drops
    /// history older than one hour as side effects.
    pub fn can_restart(&mut self) -> bool {
        let now = self.clock.now();

        if self.circuit_open {
            match self.circuit_open_until {
                Some(until) if now < until => {
                    warn!(until = %until.to_rfc3339(), "circuit breaker open, restart refused");
                    return false;
                },
                _ => {
                    info!("circuit breaker cooldown elapsed, closing");
                    self.circuit_open = false;
                    self.circuit_open_until = None;
                    self.consecutive_failures = 0;
                },
            }
        }

        let cutoff = now - window();
        while self.history.front().is_some_and(|t| *t < cutoff) {
            self.history.pop_front();
        }

        if self.history.len() >= self.config.max_restarts_per_hour {
            warn!(
                restarts = self.history.len(),
                max = self.config.max_restarts_per_hour,
                "restart rate limit reached"
            );
            return false;
        }
        true
    }

    /// `min(base * 2^(failures - 1), max)`; zero before any failure.
    pub fn backoff_delay(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(self.consecutive_failures - 1)
            .and_then(|factor| self.config.base_backoff.checked_mul(factor))
            .map_or(self.config.max_backoff, |d| d.min(self.config.max_backoff))
    }

    pub fn record_restart(&mut self, success: bool) {
        let now = self.clock.now();
        self.history.push_back(now);

        if success {
            self.consecutive_failures = 0;
            return;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.config.circuit_breaker_threshold && !self.circuit_open
        {
            let cooldown =
                TimeDelta::from_std(self.config.circuit_cooldown).unwrap_or(TimeDelta::MAX);
            let until = now
                .checked_add_signed(cooldown)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            warn!(
                failures = self.consecutive_failures,
                until = %until.to_rfc3339(),
                "opening circuit breaker"
            );
            self.circuit_open = true;
            self.circuit_open_until = Some(until);
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_circuit_open(&self) -> bool {
        self.circuit_open
    }

    pub fn status(&self) -> RestartPolicyStatus {
        let cutoff = self.clock.now() - window();
        RestartPolicyStatus {
            restarts_last_hour: self.history.iter().filter(|t| **t >= cutoff).count(),
            max_restarts_per_hour: self.config.max_restarts_per_hour,
            consecutive_failures: self.consecutive_failures,
            circuit_open: self.circuit_open,
            circuit_open_until: self.circuit_open_until,
            next_backoff_seconds: self.backoff_delay().as_secs_f64(),
        }
    }
}
