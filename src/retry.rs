//! Reconnection policy shared by the socket transport and the status prober.
//!
//! A [`RetryPolicy`] owns the attempt counter and the manual retry signal for one
//! session. Every path that observes a liveness failure asks the policy for the
//! next delay, computed by that path's own [`Schedule`]; every path that observes
//! success resets it. Once the configured number of attempts is spent,
//! [`RetryPolicy::next_delay_from`] returns `None` and callers park on
//! [`RetryPolicy::retry_signal`] until [`RetryPolicy::retry`] is invoked.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use backoff::backoff::Backoff as _;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use tokio::sync::watch;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// How the delay grows between consecutive attempts.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    /// Every attempt waits the base delay.
    Fixed,
    /// Attempt `n` waits `n * delay`.
    Linear,
    /// Randomized exponential growth starting at the base delay.
    Exponential {
        multiplier: f64,
        max_delay: Duration,
    },
}

/// Configuration for a [`RetryPolicy`].
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct RetryConfig {
    /// When `false`, no automatic retry is ever scheduled.
    #[builder(default = true)]
    pub enabled: bool,
    /// Number of automatic retries before the policy is exhausted.
    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,
    /// Base delay fed to the [`Strategy`].
    #[builder(default = DEFAULT_DELAY)]
    pub delay: Duration,
    #[builder(default = Strategy::Fixed)]
    pub strategy: Strategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Delay schedule of one retry path.
///
/// The delay is derived from the attempt number handed out by a [`RetryPolicy`],
/// so paths sharing a policy share the counter while each keeps its own growth:
/// attempt `n` waits `delay` ([`Strategy::Fixed`]), `n * delay`
/// ([`Strategy::Linear`]) or the next randomized exponential step.
pub struct Schedule {
    delay: Duration,
    strategy: Strategy,
    exponential: Mutex<Exponential>,
}

struct Exponential {
    backoff: ExponentialBackoff,
    last_attempt: u32,
}

impl Schedule {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        let (multiplier, max_delay) = match config.strategy {
            Strategy::Exponential {
                multiplier,
                max_delay,
            } => (multiplier, max_delay),
            Strategy::Fixed | Strategy::Linear => (1.0, config.delay),
        };

        let backoff = ExponentialBackoffBuilder::default()
            .with_initial_interval(config.delay)
            .with_max_interval(max_delay)
            .with_multiplier(multiplier)
            .with_max_elapsed_time(None) // attempts are bounded by the policy
            .build();

        Self {
            delay: config.delay,
            strategy: config.strategy,
            exponential: Mutex::new(Exponential {
                backoff,
                last_attempt: 0,
            }),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Delay before retry number `attempt`, counted from 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            Strategy::Fixed => self.delay,
            Strategy::Linear => self.delay.saturating_mul(attempt.max(1)),
            Strategy::Exponential { max_delay, .. } => {
                let mut exponential = self
                    .exponential
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);

                // The shared counter was reset since this path last retried.
                if attempt <= exponential.last_attempt {
                    exponential.backoff.reset();
                }
                exponential.last_attempt = attempt;
                exponential.backoff.next_backoff().unwrap_or(max_delay)
            }
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("delay", &self.delay)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Attempt counter and manual retry signal for one session.
pub struct RetryPolicy {
    config: RetryConfig,
    attempts: Mutex<u32>,
    schedule: Schedule,
    generation: watch::Sender<u64>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let schedule = Schedule::new(&config);
        let (generation, _) = watch::channel(0);

        Self {
            config,
            attempts: Mutex::new(0),
            schedule,
            generation,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Number of automatic retries consumed since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        *self.lock()
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.config.enabled || self.attempts() >= self.config.max_attempts
    }

    /// Records a failed attempt and returns how long to wait before the next one,
    /// following the policy's own schedule.
    ///
    /// Returns `None` once `max_attempts` retries have been handed out, or when
    /// retries are disabled. The counter does not move past the maximum.
    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay_from(&self.schedule)
    }

    /// Like [`Self::next_delay`], with the delay taken from a path's own `schedule`.
    pub fn next_delay_from(&self, schedule: &Schedule) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }

        let attempt = {
            let mut attempts = self.lock();
            if *attempts >= self.config.max_attempts {
                return None;
            }
            *attempts += 1;
            *attempts
        };

        Some(schedule.delay_for(attempt))
    }

    /// Clears the attempt counter after a successful connection.
    pub fn reset(&self) {
        *self.lock() = 0;
    }

    /// Manual retry: resets the counter and wakes every path parked on the policy.
    pub fn retry(&self) {
        self.reset();
        self.generation.send_modify(|generation| {
            *generation = generation.wrapping_add(1);
        });

        #[cfg(feature = "tracing")]
        tracing::debug!("manual retry requested");
    }

    /// Receiver that changes on every [`RetryPolicy::retry`] call made after subscribing.
    #[must_use]
    pub fn retry_signal(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, u32> {
        // A bare counter cannot be left half-updated by a panic.
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}
