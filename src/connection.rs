//! Connection state and liveness tracking.
//!
//! The device sends a `watchdog` keepalive every couple of seconds. The
//! [`ConnectionManager`] keeps one watchdog timer armed; each keepalive pushes
//! it out again. When it fires while connected the link is declared lost, the
//! transport is closed and the session shuts down the running acquisition.

use crate::config::SessionTiming;
use crate::effects::{Effect, Notification};
use crate::protocol::Command;
use crate::timer::{TimerHandle, TimerKind, TimerQueue};
use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Link state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No open link, or liveness lost
    Disconnected,
    /// Link open and alive
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Connection lifecycle notifications published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Link opened.
    Connected,
    /// Link closed.
    Disconnected {
        /// Close reason reported by the transport
        reason: String,
    },
    /// No keepalive within the watchdog timeout.
    LivenessLost,
}

/// Outcome of the delayed handshake re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeCheck {
    /// Link is open now; configuration was requested.
    Requested,
    /// Still no link.
    Unreachable,
}

fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(365))
}

/// Link state, liveness watchdog and send gating.
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    last_liveness: Option<DateTime<Local>>,
    watchdog: Option<TimerHandle>,
    recheck: Option<TimerHandle>,
    watchdog_timeout: Duration,
    handshake_grace: Duration,
    handshake_done: bool,
}

impl ConnectionManager {
    /// Create a disconnected manager with the watchdog armed.
    pub fn new(timing: &SessionTiming, timers: &mut TimerQueue, now: DateTime<Local>) -> Self {
        let mut manager = Self {
            state: ConnectionState::Disconnected,
            last_liveness: None,
            watchdog: None,
            recheck: None,
            watchdog_timeout: to_chrono(timing.watchdog_timeout()),
            handshake_grace: to_chrono(timing.handshake_grace()),
            handshake_done: false,
        };
        manager.arm_watchdog(timers, now);
        manager
    }

    /// Current link state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the link is open and alive.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Time of the last keepalive or handshake reply.
    pub fn last_liveness(&self) -> Option<DateTime<Local>> {
        self.last_liveness
    }

    /// Whether the device answered the `connected` handshake.
    pub fn handshake_done(&self) -> bool {
        self.handshake_done
    }

    /// Record the `connected` reply.
    pub fn mark_handshake(&mut self) {
        self.handshake_done = true;
    }

    fn arm_watchdog(&mut self, timers: &mut TimerQueue, now: DateTime<Local>) {
        if let Some(handle) = self.watchdog.take() {
            timers.cancel(handle);
        }
        self.watchdog = Some(timers.schedule(TimerKind::Watchdog, now + self.watchdog_timeout));
    }

    /// Gate an outbound command on the link state.
    ///
    /// Commands are never queued: when disconnected the command is dropped and
    /// the operator is told instead.
    pub fn send(&self, command: Command) -> Effect {
        if self.is_connected() {
            Effect::Transmit(command)
        } else {
            warn!(%command, "Command dropped: not connected");
            Effect::Notify(Notification::connection_error())
        }
    }

    /// A keepalive arrived.
    pub fn refresh_liveness(&mut self, timers: &mut TimerQueue, now: DateTime<Local>) {
        self.last_liveness = Some(now);
        self.arm_watchdog(timers, now);
    }

    /// The transport finished opening.
    pub fn on_transport_opened(
        &mut self,
        timers: &mut TimerQueue,
        now: DateTime<Local>,
    ) -> Vec<Effect> {
        info!("Device link open");
        self.state = ConnectionState::Connected;
        self.handshake_done = false;
        self.refresh_liveness(timers, now);
        vec![Effect::Connection(ConnectionEvent::Connected)]
    }

    /// The transport closed. Returns `true` if the link was up, in which case
    /// the caller must run the abnormal-disconnection shutdown.
    pub fn on_transport_closed(&mut self, timers: &mut TimerQueue, reason: &str) -> (bool, Vec<Effect>) {
        if let Some(handle) = self.watchdog.take() {
            timers.cancel(handle);
        }
        let was_connected = self.is_connected();
        self.state = ConnectionState::Disconnected;
        self.handshake_done = false;
        if !was_connected {
            debug!(%reason, "Transport closed while already disconnected");
            return (false, Vec::new());
        }
        warn!(%reason, "Device link closed");
        (
            true,
            vec![Effect::Connection(ConnectionEvent::Disconnected {
                reason: reason.to_string(),
            })],
        )
    }

    /// A watchdog timer fired. Returns `true` if liveness was lost, in which
    /// case the caller must run the abnormal-disconnection shutdown.
    pub fn on_watchdog_expired(&mut self, handle: TimerHandle) -> (bool, Vec<Effect>) {
        if self.watchdog != Some(handle) {
            debug!("Stale watchdog timer ignored");
            return (false, Vec::new());
        }
        self.watchdog = None;
        if !self.is_connected() {
            debug!("Watchdog expired before the link opened");
            return (false, Vec::new());
        }
        warn!(
            last = ?self.last_liveness,
            "No keepalive from device, declaring link lost"
        );
        self.state = ConnectionState::Disconnected;
        self.handshake_done = false;
        (
            true,
            vec![
                Effect::Connection(ConnectionEvent::LivenessLost),
                Effect::CloseTransport,
            ],
        )
    }

    /// Start the session: request the device configuration, or retry once after
    /// the grace period when the link is not open yet.
    pub fn begin_session(&mut self, timers: &mut TimerQueue, now: DateTime<Local>) -> Vec<Effect> {
        if self.is_connected() {
            return vec![Effect::Transmit(Command::update_config_init())];
        }
        if let Some(handle) = self.recheck.take() {
            timers.cancel(handle);
        }
        debug!(grace = ?self.handshake_grace, "Link not open yet, re-checking later");
        self.recheck = Some(timers.schedule(TimerKind::HandshakeRecheck, now + self.handshake_grace));
        Vec::new()
    }

    /// The handshake re-check timer fired.
    pub fn on_handshake_recheck(&mut self, handle: TimerHandle) -> Option<(HandshakeCheck, Vec<Effect>)> {
        if self.recheck != Some(handle) {
            return None;
        }
        self.recheck = None;
        if self.is_connected() {
            Some((
                HandshakeCheck::Requested,
                vec![Effect::Transmit(Command::update_config_init())],
            ))
        } else {
            warn!("Device still unreachable after grace period");
            Some((
                HandshakeCheck::Unreachable,
                vec![Effect::Notify(Notification::connection_error())],
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn manager(timers: &mut TimerQueue) -> ConnectionManager {
        ConnectionManager::new(&SessionTiming::default(), timers, t(0))
    }

    #[test]
    fn watchdog_armed_on_construction() {
        let mut timers = TimerQueue::new();
        let manager = manager(&mut timers);
        assert!(!manager.is_connected());
        assert_eq!(timers.next_deadline(), Some(t(6000)));
    }

    #[test]
    fn keepalive_pushes_watchdog_out() {
        let mut timers = TimerQueue::new();
        let mut manager = manager(&mut timers);
        manager.on_transport_opened(&mut timers, t(0));
        manager.refresh_liveness(&mut timers, t(4000));
        assert!(timers.expire(t(6000)).is_empty());
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(t(10_000)));
    }

    #[test]
    fn watchdog_expiry_declares_liveness_lost() {
        let mut timers = TimerQueue::new();
        let mut manager = manager(&mut timers);
        manager.on_transport_opened(&mut timers, t(0));
        let fired = timers.expire(t(6000));
        assert_eq!(fired.len(), 1);
        let (lost, effects) = manager.on_watchdog_expired(fired[0].0);
        assert!(lost);
        assert!(effects.contains(&Effect::Connection(ConnectionEvent::LivenessLost)));
        assert!(effects.contains(&Effect::CloseTransport));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn send_while_disconnected_notifies() {
        let mut timers = TimerQueue::new();
        let manager = manager(&mut timers);
        assert_eq!(
            manager.send(Command::reset_alarms()),
            Effect::Notify(Notification::connection_error())
        );
    }

    #[test]
    fn begin_session_rechecks_after_grace() {
        let mut timers = TimerQueue::new();
        let mut manager = manager(&mut timers);
        assert!(manager.begin_session(&mut timers, t(0)).is_empty());

        let fired = timers.expire(t(1100));
        assert_eq!(fired, vec![(fired[0].0, TimerKind::HandshakeRecheck)]);
        let (check, _) = manager.on_handshake_recheck(fired[0].0).unwrap();
        assert_eq!(check, HandshakeCheck::Unreachable);
    }

    #[test]
    fn begin_session_when_connected_requests_config() {
        let mut timers = TimerQueue::new();
        let mut manager = manager(&mut timers);
        manager.on_transport_opened(&mut timers, t(0));
        let effects = manager.begin_session(&mut timers, t(10));
        assert_eq!(effects, vec![Effect::Transmit(Command::update_config_init())]);
    }
}
