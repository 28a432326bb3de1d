//! Effects produced by the session core.
//!
//! Every entry point of [`crate::session::DeviceSession`] returns an ordered
//! list of [`Effect`]s instead of performing I/O. The runtime performs them in
//! order: transmit frames, forward rendering requests to the
//! [`crate::presenter::Presenter`], close the transport.

use crate::alarms::ErrorRecord;
use crate::calibration::{CalibrationFactors, CalibrationKind};
use crate::catalog::{FileCatalogKind, ListPresentation, RunEntry, RunKind};
use crate::connection::ConnectionEvent;
use crate::protocol::{Command, PlotUpdate};
use crate::settings::Switch;
use crate::state::{AcquisitionMode, ControlUnitStatus, HvStatus};
use serde_json::Value;
use std::fmt;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// Neutral information
    Info,
    /// Operation completed
    Success,
    /// Request refused or degraded state
    Warning,
    /// Failure the operator must act on
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationLevel::Info => write!(f, "info"),
            NotificationLevel::Success => write!(f, "success"),
            NotificationLevel::Warning => write!(f, "warning"),
            NotificationLevel::Error => write!(f, "error"),
        }
    }
}

/// A short message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Severity
    pub level: NotificationLevel,
    /// Text shown to the operator
    pub message: String,
}

impl Notification {
    /// Notification with an explicit level.
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    /// Info-level notification.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    /// Success-level notification.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    /// Warning-level notification.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    /// Error-level notification.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    /// Notification shown whenever an operation needs the device link.
    pub fn connection_error() -> Self {
        Self::error("Connection error! The device is not reachable")
    }
}

/// Identifies an outstanding yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfirmId(pub(crate) u64);

impl From<u64> for ConfirmId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConfirmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A yes/no question the operator must answer before an action proceeds.
///
/// The answer is fed back through
/// [`DeviceSession::resolve_confirmation`](crate::session::DeviceSession::resolve_confirmation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    /// Id to answer with
    pub id: ConfirmId,
    /// Dialog title
    pub title: String,
    /// Question text
    pub message: String,
}

/// Enabled/disabled state of the interactive controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionState {
    /// Buttons, selectors and switches accept input
    pub controls_enabled: bool,
    /// Sampling-rate selector accepts input
    pub sampling_rate_enabled: bool,
    /// Plot hover tooltips are shown
    pub plot_tooltips: bool,
    /// Busy indicator is shown
    pub loader_active: bool,
}

impl InteractionState {
    /// Controls while an acquisition mode is active.
    pub fn locked() -> Self {
        Self {
            controls_enabled: false,
            sampling_rate_enabled: false,
            plot_tooltips: false,
            loader_active: true,
        }
    }

    /// Controls after returning to idle.
    pub fn released(sampling_rate_enabled: bool) -> Self {
        Self {
            controls_enabled: true,
            sampling_rate_enabled,
            plot_tooltips: true,
            loader_active: false,
        }
    }
}

/// Modal dialogs the session can ask the presenter to open.
#[derive(Debug, Clone, PartialEq)]
pub enum Dialog {
    /// Save or discard the run that just ended (notes entry).
    SaveRun,
    /// Name or discard the background file the device just recorded.
    SaveBackground {
        /// Name the device gave the recording
        filename: String,
    },
    /// Show the accumulated device errors and warnings.
    ErrorLog(Vec<ErrorRecord>),
}

/// Rendering requests forwarded to the presenter.
#[derive(Debug, Clone, PartialEq)]
pub enum UiUpdate {
    /// Acquisition mode indicator
    AcquisitionMode(AcquisitionMode),
    /// Enable or lock the controls
    Interaction(InteractionState),
    /// Clear every plot
    ResetPlots,
    /// New data for one plot
    Plot(PlotUpdate),
    /// Control-unit indicator
    ControlUnit(ControlUnitStatus),
    /// HV indicator
    Hv(HvStatus),
    /// Device memory usage, as reported
    Memory(Value),
    /// Sampling modes offered by the device
    SamplingModeOptions(Value),
    /// Sampling rates offered by the device
    SamplingRateOptions(Value),
    /// Device-side error list
    ErrorListText(Value),
    /// Free-form device message
    DeviceMessage(Value),
    /// Move a switch to the given position
    Switch {
        /// Which switch
        switch: Switch,
        /// New position
        on: bool,
    },
    /// Fill a file selector or listing
    FileList {
        /// Catalog the names belong to
        catalog: FileCatalogKind,
        /// Selector or logbook listing
        presentation: ListPresentation,
        /// File names
        files: Vec<String>,
    },
    /// Fill a logbook run table
    RunList {
        /// Run family
        kind: RunKind,
        /// Rows
        entries: Vec<RunEntry>,
    },
    /// Show loaded calibration factors
    Calibration {
        /// Position or range
        kind: CalibrationKind,
        /// Factors to show
        factors: CalibrationFactors,
    },
    /// Start a browser download
    Download {
        /// Location of the archive
        url: String,
    },
    /// Open a dialog
    Dialog(Dialog),
}

/// One thing the runtime must do on behalf of the session core.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Encode and send a command to the device.
    Transmit(Command),
    /// Show a notification.
    Notify(Notification),
    /// Ask a yes/no question.
    Confirm(ConfirmRequest),
    /// Forward a rendering request.
    Ui(UiUpdate),
    /// Publish a connection lifecycle event.
    Connection(ConnectionEvent),
    /// Close the transport; the link task reconnects on its own.
    CloseTransport,
}

impl Effect {
    /// Shorthand for [`Effect::Notify`].
    pub fn notify(notification: Notification) -> Self {
        Effect::Notify(notification)
    }

    /// The command carried by a `Transmit` effect.
    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Effect::Transmit(command) => Some(command),
            _ => None,
        }
    }

    /// The notification carried by a `Notify` effect.
    pub fn as_notification(&self) -> Option<&Notification> {
        match self {
            Effect::Notify(notification) => Some(notification),
            _ => None,
        }
    }
}

/// Names of every command transmitted by a batch of effects, in order.
pub fn transmitted(effects: &[Effect]) -> Vec<&str> {
    effects
        .iter()
        .filter_map(Effect::as_command)
        .map(|command| command.name.as_str())
        .collect()
}

/// Messages of every notification in a batch of effects, in order.
pub fn notifications(effects: &[Effect]) -> Vec<&str> {
    effects
        .iter()
        .filter_map(Effect::as_notification)
        .map(|notification| notification.message.as_str())
        .collect()
}
