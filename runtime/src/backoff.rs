//! Reconnect backoff policies.
//!
//! A [`BackoffPolicy`] decides how long a reconnector waits between failed
//! connection attempts. The first retry after a lost connection is always
//! immediate; the policy governs every attempt after that.
//!
//! # Example
//!
//! ```
//! use relay_runtime::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(5))
//!     .with_multiplier(3.0)
//!     .without_jitter();
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(300));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every attempt.
    Fixed,
    /// `initial * multiplier^attempt`, capped at the maximum.
    Exponential {
        /// Growth factor per attempt
        multiplier: f64,
    },
}

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    strategy: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    /// Constant delay between attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            initial_delay: delay,
            max_delay: delay,
            jitter: false,
        }
    }

    /// Doubling delay from `initial` up to `max`, with jitter.
    #[must_use]
    pub const fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            initial_delay: initial,
            max_delay: max,
            jitter: true,
        }
    }

    /// Set the growth factor. Turns a fixed policy exponential.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.strategy = BackoffStrategy::Exponential { multiplier };
        self
    }

    /// Set the maximum delay.
    #[must_use]
    pub const fn with_max_delay(mut self, max: Duration) -> Self {
        self.max_delay = max;
        self
    }

    /// Enable jitter.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Disable jitter (deterministic delays, mostly for tests).
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// The growth strategy.
    #[must_use]
    pub const fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    /// Delay before the first scheduled attempt.
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Upper bound on any single delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Calculate delay for a given attempt number (0-indexed).
    ///
    /// With jitter the capped delay is scaled by a random factor in
    /// `[0.5, 1.0]`, so processes that lost the same resource at the same
    /// moment do not reconnect in lockstep.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_secs = match self.strategy {
            BackoffStrategy::Fixed => self.initial_delay.as_secs_f64(),
            BackoffStrategy::Exponential { multiplier } => {
                // Exponent saturates long before i32::MAX matters
                #[allow(clippy::cast_possible_wrap)]
                let exponent = attempt.min(64) as i32;
                self.initial_delay.as_secs_f64() * multiplier.powi(exponent)
            }
        };

        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            capped_secs * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), Duration::from_secs(10))
    }
}
