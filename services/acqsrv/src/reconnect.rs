//! Reconnection backoff for inactive devices
//!
//! The scheduler asks [`ReconnectGate::attempt_due`] on every tick instead of
//! sleeping, so a device that is down never blocks the tick loop. Delays grow
//! exponentially with ±25% jitter. Once `max_attempts` is spent the gate keeps
//! retrying every `max_delay`.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection state as seen by the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// Backing off between attempts
    Reconnecting,
    /// Attempts exhausted, retrying at `max_delay`
    Failed,
}

/// Reconnection policy configuration
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum backoff attempts (0 means unlimited)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Per-device backoff state
#[derive(Debug)]
pub struct ReconnectGate {
    policy: ReconnectPolicy,
    state: ConnectionState,
    current_attempt: u32,
    next_attempt: Option<Instant>,
    stats: ReconnectStats,
}

impl ReconnectGate {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            current_attempt: 0,
            next_attempt: None,
            stats: ReconnectStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Whether a connect attempt may run at `now`
    pub fn attempt_due(&self, now: Instant) -> bool {
        match self.state {
            ConnectionState::Connected => false,
            _ => self.next_attempt.map_or(true, |at| now >= at),
        }
    }

    pub fn mark_connected(&mut self) {
        if self.state != ConnectionState::Connected && self.stats.total_attempts > 0 {
            self.stats.successful_reconnects += 1;
        }
        self.state = ConnectionState::Connected;
        self.current_attempt = 0;
        self.next_attempt = None;
        self.stats.last_connected = Some(Instant::now());
        debug!("Connection marked as successful");
    }

    /// Connection lost; the next attempt is due immediately
    pub fn mark_disconnected(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
            self.current_attempt = 0;
            self.next_attempt = None;
            debug!("Connection marked as disconnected");
        }
    }

    /// Record a failed attempt made at `now` and schedule the next one
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.stats.total_attempts += 1;
        self.stats.failed_reconnects += 1;
        self.current_attempt = self.current_attempt.saturating_add(1);

        let exhausted =
            self.policy.max_attempts > 0 && self.current_attempt >= self.policy.max_attempts;
        let delay = if exhausted {
            if self.state != ConnectionState::Failed {
                warn!(
                    "Maximum reconnection attempts ({}) exceeded, retrying every {:?}",
                    self.policy.max_attempts, self.policy.max_delay
                );
            }
            self.state = ConnectionState::Failed;
            self.policy.max_delay
        } else {
            self.state = ConnectionState::Reconnecting;
            self.calculate_next_delay()
        };

        info!(
            "Reconnection attempt {} failed, next in {:?}",
            self.current_attempt, delay
        );
        self.next_attempt = Some(now + delay);
        delay
    }

    /// Backoff delay for the current attempt count
    pub fn calculate_next_delay(&self) -> Duration {
        let attempt = self.current_attempt.saturating_sub(1);
        let mut delay = self
            .policy
            .initial_delay
            .mul_f64(self.policy.backoff_multiplier.powi(attempt as i32));

        if delay > self.policy.max_delay {
            delay = self.policy.max_delay;
        }

        // ±25%
        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }
}
