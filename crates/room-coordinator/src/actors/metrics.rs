//! Actor counters and mailbox monitoring.
//!
//! `ActorMetrics` is shared by every actor on the instance and mirrors its
//! counts into the Prometheus gauges. `MailboxMonitor` is owned by a single
//! actor and only sampled from its own task.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Mailbox depth above which a room actor logs a warning.
pub const ROOM_MAILBOX_WARNING: usize = 64;

/// Mailbox depth above which the directory logs a warning.
pub const DIRECTORY_MAILBOX_WARNING: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Directory,
    Room,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Directory => "directory",
            ActorType::Room => "room",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Directory => DIRECTORY_MAILBOX_WARNING,
            ActorType::Room => ROOM_MAILBOX_WARNING,
        }
    }
}

/// Tracks queue depth for one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: usize,
    peak_depth: usize,
    messages_processed: u64,
    above_warning: bool,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: 0,
            peak_depth: 0,
            messages_processed: 0,
            above_warning: false,
        }
    }

    /// Record one processed message and the depth left behind it.
    pub fn record_processed(&mut self, remaining_depth: usize) {
        self.messages_processed += 1;
        self.depth = remaining_depth;
        self.peak_depth = self.peak_depth.max(remaining_depth);

        let threshold = self.actor_type.warning_threshold();
        if remaining_depth >= threshold && !self.above_warning {
            self.above_warning = true;
            warn!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = remaining_depth,
                threshold,
                "Mailbox depth above warning threshold"
            );
        } else if remaining_depth < threshold / 2 {
            self.above_warning = false;
        }

        prom::set_actor_mailbox_depth(self.actor_type.as_str(), remaining_depth);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }
}

/// Instance-wide actor counters.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    rooms: AtomicUsize,
    participants: AtomicUsize,
    pending_audit: AtomicUsize,
    panics: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_spawned(&self) {
        let count = self.rooms.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_rooms_active(count);
    }

    pub fn room_stopped(&self) {
        let count = saturating_sub(&self.rooms, 1);
        prom::set_rooms_active(count);
    }

    pub fn participants_added(&self, n: usize) {
        if n == 0 {
            return;
        }
        let count = self.participants.fetch_add(n, Ordering::Relaxed) + n;
        prom::set_participants_active(count);
    }

    pub fn participants_removed(&self, n: usize) {
        if n == 0 {
            return;
        }
        let count = saturating_sub(&self.participants, n);
        prom::set_participants_active(count);
    }

    /// Apply a change in one room's undelivered audit count.
    pub fn audit_pending_changed(&self, before: usize, after: usize) {
        let count = if after >= before {
            self.pending_audit.fetch_add(after - before, Ordering::Relaxed) + (after - before)
        } else {
            saturating_sub(&self.pending_audit, before - after)
        };
        prom::set_audit_pending(count);
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        self.panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pending_audit_count(&self) -> usize {
        self.pending_audit.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

fn saturating_sub(counter: &AtomicUsize, n: usize) -> usize {
    let previous = counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some(current.saturating_sub(n))
        })
        .unwrap_or_else(|current| current);
    previous.saturating_sub(n)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_tracks_peak() {
        let mut monitor = MailboxMonitor::new(ActorType::Room, "room-1");
        monitor.record_processed(3);
        monitor.record_processed(9);
        monitor.record_processed(0);

        assert_eq!(monitor.messages_processed(), 3);
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.peak_depth(), 9);
    }

    #[test]
    fn test_warning_latch_resets_after_drain() {
        let mut monitor = MailboxMonitor::new(ActorType::Room, "room-1");
        monitor.record_processed(ROOM_MAILBOX_WARNING);
        assert!(monitor.above_warning);
        monitor.record_processed(ROOM_MAILBOX_WARNING - 1);
        assert!(monitor.above_warning);
        monitor.record_processed(1);
        assert!(!monitor.above_warning);
    }

    #[test]
    fn test_actor_counters() {
        let metrics = ActorMetrics::new();
        metrics.room_spawned();
        metrics.room_spawned();
        metrics.room_stopped();
        assert_eq!(metrics.room_count(), 1);

        metrics.participants_added(4);
        metrics.participants_removed(1);
        assert_eq!(metrics.participant_count(), 3);

        metrics.record_panic(ActorType::Room);
        assert_eq!(metrics.panic_count(), 1);
    }

    #[test]
    fn test_counters_do_not_underflow() {
        let metrics = ActorMetrics::new();
        metrics.room_stopped();
        metrics.participants_removed(5);
        assert_eq!(metrics.room_count(), 0);
        assert_eq!(metrics.participant_count(), 0);
    }

    #[test]
    fn test_audit_pending_delta() {
        let metrics = ActorMetrics::new();
        metrics.audit_pending_changed(0, 3);
        metrics.audit_pending_changed(3, 1);
        assert_eq!(metrics.pending_audit_count(), 1);
        metrics.audit_pending_changed(1, 1);
        assert_eq!(metrics.pending_audit_count(), 1);
    }
}
