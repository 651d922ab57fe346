//! Single re-armable deadline for the room's metering tick.
//!
//! The alarm is polled inside the actor's `select!`, so a tick runs on the
//! actor task and is serialized with every other operation on the room.

use std::time::Duration;
use tokio::time::Instant;

/// At most one pending deadline.
#[derive(Debug)]
pub struct TickAlarm {
    interval: Duration,
    deadline: Option<Instant>,
}

impl TickAlarm {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Arms the alarm one interval from now.
    ///
    /// Returns `false` and leaves the existing deadline alone when already
    /// armed.
    pub fn arm(&mut self) -> bool {
        self.arm_in(self.interval)
    }

    /// Arms the alarm `delay` from now unless it is already armed.
    pub fn arm_in(&mut self, delay: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + delay);
        true
    }

    /// Clears the deadline. Returns whether one was set.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Resolves when the deadline passes; pends forever while disarmed.
    ///
    /// The deadline stays set after firing. The caller must `cancel` before
    /// polling again.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_arm_is_idempotent() {
        let mut alarm = TickAlarm::new(Duration::from_secs(30));
        assert!(alarm.arm());

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!alarm.arm(), "second arm must not push the deadline out");

        // Original deadline is 10s away, not 30s.
        let fired = tokio::time::timeout(Duration::from_secs(11), alarm.fired()).await;
        assert!(fired.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_alarm_never_fires() {
        let alarm = TickAlarm::new(Duration::from_secs(30));
        let fired = tokio::time::timeout(Duration::from_secs(3600), alarm.fired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_rearm() {
        let mut alarm = TickAlarm::new(Duration::from_secs(30));
        alarm.arm();
        assert!(alarm.cancel());
        assert!(!alarm.is_armed());
        assert!(!alarm.cancel());

        assert!(alarm.arm_in(Duration::from_secs(5)));
        let fired = tokio::time::timeout(Duration::from_secs(6), alarm.fired()).await;
        assert!(fired.is_ok());
        assert!(alarm.is_armed(), "firing does not clear the deadline");
    }
}
