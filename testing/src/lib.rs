//! # Relay Testing
//!
//! Testing utilities for relay.
//!
//! This crate provides:
//! - [`InMemoryBus`]: a shared publish/subscribe hub with fault injection
//! - [`InMemoryStore`]: a store connector that can refuse, hang or drop
//! - [`FixedClock`] and [`ManualClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use relay_testing::{InMemoryBus, InMemoryStore};
//!
//! #[tokio::test]
//! async fn test_two_processes() {
//!     let bus = InMemoryBus::new();
//!     let node_a = RelayNode::new(Arc::new(bus.clone()), store_a, config());
//!     let node_b = RelayNode::new(Arc::new(bus.clone()), store_b, config());
//!
//!     bus.disconnect_all(); // both nodes lose the bus and reconnect
//! }
//! ```

pub mod bus;
pub mod store;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use relay_core::environment::Clock;
use std::sync::Arc;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use relay_testing::mocks::FixedClock;
    /// use relay_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the code
    /// under test and advance it from outside.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber honouring `RUST_LOG` for the current
    /// test binary. Safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use bus::InMemoryBus;
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};
pub use store::{InMemoryStore, StoreHandle};
