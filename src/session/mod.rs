//! Device session facade.
//!
//! [`DeviceSession`] is the single owner of everything the client knows about
//! one device: connection, acquisition state, error log, settings form, file
//! catalog and calibration factors. It performs no I/O. Each entry point takes
//! the current time and returns the [`Effect`]s to carry out, in order.
//!
//! - [`dispatch`]: inbound frames
//! - [`intents`]: operator requests ([`UserIntent`])
//! - [`confirm`]: pending yes/no questions ([`PendingAction`])
//!
//! # Example
//!
//! ```
//! use chrono::Local;
//! use detector_session::config::SessionConfig;
//! use detector_session::session::{DeviceSession, UserIntent};
//!
//! let now = Local::now();
//! let mut session = DeviceSession::new(&SessionConfig::default(), now);
//! session.on_transport_opened(now);
//! session.dispatch(r#"{"action":"connected","value":"{\"type\":0}"}"#, now);
//! let effects = session.apply(UserIntent::ToggleStreaming, now);
//! assert!(!effects.is_empty());
//! ```

pub mod confirm;
pub mod dispatch;
pub mod intents;

pub use confirm::{Confirmations, PendingAction};
pub use intents::UserIntent;

use crate::alarms::{ErrorAggregator, ErrorRecord};
use crate::calibration::CalibrationFactors;
use crate::catalog::FileCatalog;
use crate::config::{DeviceConfig, SessionConfig};
use crate::connection::{ConnectionManager, ConnectionState, HandshakeCheck};
use crate::effects::Effect;
use crate::settings::{Settings, SettingsForm};
use crate::state::{ControlUnitStatus, HvStatus, SessionState, SessionStateMachine};
use crate::timer::{TimerKind, TimerQueue};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::debug;

/// Read-only view of the session, cloned out for callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Link state
    pub connection: ConnectionState,
    /// Device answered the handshake
    pub handshake_done: bool,
    /// Mode and indicators
    pub state: SessionState,
    /// Last keepalive
    pub last_liveness: Option<DateTime<Local>>,
    /// Error log
    pub errors: Vec<ErrorRecord>,
    /// Questions awaiting an answer
    pub pending_confirmations: usize,
    /// Form frozen at snapshot time
    pub settings: Settings,
}

/// One device session.
#[derive(Debug)]
pub struct DeviceSession {
    device: DeviceConfig,
    timers: TimerQueue,
    connection: ConnectionManager,
    machine: SessionStateMachine,
    alarms: ErrorAggregator,
    form: SettingsForm,
    catalog: FileCatalog,
    calibration: CalibrationFactors,
    confirmations: Confirmations,
    /// File name of the background run awaiting save/discard.
    pending_background: Option<String>,
}

impl DeviceSession {
    /// Create a disconnected, idle session. The liveness watchdog is armed
    /// immediately.
    pub fn new(config: &SessionConfig, now: DateTime<Local>) -> Self {
        let mut timers = TimerQueue::new();
        let connection = ConnectionManager::new(&config.session, &mut timers, now);
        let form = SettingsForm::new(&config.device);
        let mut machine = SessionStateMachine::new(config.device.has_hv);
        machine.set_manual_sampling(form.sampling_rate_enabled());

        Self {
            device: config.device.clone(),
            timers,
            connection,
            machine,
            alarms: ErrorAggregator::new(config.session.dedup_window()),
            form,
            catalog: FileCatalog::new(),
            calibration: CalibrationFactors::unity(&config.device.channels),
            confirmations: Confirmations::default(),
            pending_background: None,
        }
    }

    /// Device description from the configuration.
    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    /// Mode and indicators.
    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    /// Check if the link is open and alive.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Error log, oldest first.
    pub fn errors(&self) -> &[ErrorRecord] {
        self.alarms.entries()
    }

    /// Current operator choices.
    pub fn form(&self) -> &SettingsForm {
        &self.form
    }

    /// Cached device listings.
    pub fn catalog(&self) -> &FileCatalog {
        &self.catalog
    }

    /// Calibration factors in use.
    pub fn calibration(&self) -> &CalibrationFactors {
        &self.calibration
    }

    /// Clone out a read-only view.
    pub fn snapshot(&self, now: DateTime<Local>) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection.state(),
            handshake_done: self.connection.handshake_done(),
            state: self.machine.state(),
            last_liveness: self.connection.last_liveness(),
            errors: self.alarms.entries().to_vec(),
            pending_confirmations: self.confirmations.len(),
            settings: self.form.snapshot(now),
        }
    }

    /// Earliest timer deadline; the runtime sleeps until then.
    pub fn next_deadline(&self) -> Option<DateTime<Local>> {
        self.timers.next_deadline()
    }

    /// Operator opened the session: request the device configuration.
    pub fn begin(&mut self, now: DateTime<Local>) -> Vec<Effect> {
        let effects = self.connection.begin_session(&mut self.timers, now);
        self.gate(effects)
    }

    /// The link task opened the socket.
    pub fn on_transport_opened(&mut self, now: DateTime<Local>) -> Vec<Effect> {
        self.connection.on_transport_opened(&mut self.timers, now)
    }

    /// The socket closed. Open questions are dropped.
    pub fn on_transport_closed(&mut self, reason: &str) -> Vec<Effect> {
        let (was_connected, mut effects) =
            self.connection.on_transport_closed(&mut self.timers, reason);
        if was_connected {
            effects.extend(self.machine.on_abnormal_disconnection());
        }
        self.confirmations.clear();
        effects
    }

    /// Fire every timer due at `now`.
    pub fn on_timers(&mut self, now: DateTime<Local>) -> Vec<Effect> {
        let mut effects = Vec::new();
        for (handle, kind) in self.timers.expire(now) {
            debug!(%kind, "Timer fired");
            match kind {
                TimerKind::Watchdog => {
                    let (lost, lost_effects) = self.connection.on_watchdog_expired(handle);
                    effects.extend(lost_effects);
                    if lost {
                        effects.extend(self.machine.on_abnormal_disconnection());
                        self.confirmations.clear();
                    }
                }
                TimerKind::HandshakeRecheck => {
                    if let Some((check, check_effects)) =
                        self.connection.on_handshake_recheck(handle)
                    {
                        effects.extend(check_effects);
                        if check == HandshakeCheck::Unreachable {
                            effects.extend(self.machine.set_control_unit(ControlUnitStatus::Unknown));
                            effects.extend(self.machine.set_hv(HvStatus::Unknown));
                        }
                    }
                }
            }
        }
        self.gate(effects)
    }

    /// Route every outbound command through the connection. When the link is
    /// down each command is replaced by one connection-error notification.
    fn gate(&self, effects: Vec<Effect>) -> Vec<Effect> {
        let mut gated = Vec::with_capacity(effects.len());
        let mut dropped = false;
        for effect in effects {
            match effect {
                Effect::Transmit(command) => match self.connection.send(command) {
                    Effect::Transmit(command) => gated.push(Effect::Transmit(command)),
                    notice => {
                        if !dropped {
                            gated.push(notice);
                            dropped = true;
                        }
                    }
                },
                other => gated.push(other),
            }
        }
        gated
    }
}
