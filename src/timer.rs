//! Explicit timer queue.
//!
//! The session core never sleeps. Instead it schedules named deadlines in a
//! [`TimerQueue`] and the runtime wakes it up when the earliest one is due by
//! calling [`TimerQueue::expire`]. Every scheduled timer gets a [`TimerHandle`]
//! which can be used to cancel it; a cancelled timer never fires.

use chrono::{DateTime, Local};
use std::fmt;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Liveness watchdog; fires when no keepalive was seen in time.
    Watchdog,
    /// Delayed re-check of the transport after the session was started while
    /// the connection was not yet open.
    HandshakeRecheck,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Watchdog => write!(f, "watchdog"),
            TimerKind::HandshakeRecheck => write!(f, "handshake-recheck"),
        }
    }
}

/// Cancellation handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone)]
struct TimerEntry {
    handle: TimerHandle,
    kind: TimerKind,
    deadline: DateTime<Local>,
}

/// Deadline-ordered set of pending timers.
#[derive(Debug, Default)]
pub struct TimerQueue {
    next_id: u64,
    entries: Vec<TimerEntry>,
}

impl TimerQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer firing at `deadline`.
    pub fn schedule(&mut self, kind: TimerKind, deadline: DateTime<Local>) -> TimerHandle {
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        self.entries.push(TimerEntry {
            handle,
            kind,
            deadline,
        });
        handle
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.handle != handle);
        self.entries.len() != before
    }

    /// Whether the timer is still pending.
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.entries.iter().any(|entry| entry.handle == handle)
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<DateTime<Local>> {
        self.entries.iter().map(|entry| entry.deadline).min()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn expire(&mut self, now: DateTime<Local>) -> Vec<(TimerHandle, TimerKind)> {
        let mut due: Vec<TimerEntry> = Vec::new();
        self.entries.retain(|entry| {
            if entry.deadline <= now {
                due.push(entry.clone());
                false
            } else {
                true
            }
        });
        due.sort_by_key(|entry| (entry.deadline, entry.handle));
        due.into_iter()
            .map(|entry| (entry.handle, entry.kind))
            .collect()
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
