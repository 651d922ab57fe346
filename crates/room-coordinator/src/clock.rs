//! Wall-clock source for metering.
//!
//! Metering works in whole epoch seconds. Actors read the time through this
//! trait so tests can drive it together with tokio's paused clock.

/// Source of whole-second epoch timestamps.
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch.
    fn now_epoch(&self) -> i64;
}

/// Production clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

pub mod mock {
    //! Clock anchored to tokio's clock, for `start_paused` tests.

    use super::Clock;
    use tokio::time::Instant;

    /// Epoch clock that advances with `tokio::time::advance`.
    #[derive(Debug, Clone)]
    pub struct TokioClock {
        epoch_at_start: i64,
        start: Instant,
    }

    impl TokioClock {
        /// Anchor `epoch_at_start` to the current tokio instant.
        #[must_use]
        pub fn starting_at(epoch_at_start: i64) -> Self {
            Self {
                epoch_at_start,
                start: Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now_epoch(&self) -> i64 {
            let elapsed = Instant::now().duration_since(self.start).as_secs();
            self.epoch_at_start
                .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::TokioClock;
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_clock_is_after_2024() {
        assert!(SystemClock.now_epoch() > 1_704_067_200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::starting_at(1_000);
        assert_eq!(clock.now_epoch(), 1_000);

        tokio::time::advance(Duration::from_millis(29_900)).await;
        assert_eq!(clock.now_epoch(), 1_029);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(clock.now_epoch(), 1_030);
    }
}
