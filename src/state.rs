//! Acquisition state machine.
//!
//! [`SessionStateMachine`] owns the acquisition mode and the control-unit and
//! high-voltage status indicators. Legality checks are pure (`plan_*`) and return
//! a [`Transition`]; the side-effecting transitions return the effects that the
//! runtime must carry out.
//!
//! # State Machine
//!
//! ```text
//!            toggle                       toggle
//! Acquiring <──────> Idle <──────────────────────> Streaming
//!                     │ ▲
//!   record background │ │ device completion (save_background)
//!                     ▼ │
//!              BackgroundAcquiring
//! ```
//!
//! Any mode returns to `Idle` on `DAQ_end`, on a device alarm and on an
//! abnormal disconnection.

use crate::effects::{Dialog, Effect, InteractionState, Notification, UiUpdate};
use crate::protocol::Command;
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Control-unit code for a healthy device.
pub const CONTROL_UNIT_OK: i64 = 0;

/// Status code meaning "no information".
pub const STATUS_UNKNOWN: i64 = 99;

/// Acquisition mode of the device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionMode {
    /// Nothing running
    Idle,
    /// Foreground DAQ run being recorded
    Acquiring,
    /// Live data streaming, nothing recorded
    Streaming,
    /// Background reference being recorded; stops on its own
    BackgroundAcquiring,
    /// Reserved for device-specific modes reported by firmware
    DeviceSpecific,
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Idle => write!(f, "Idle"),
            AcquisitionMode::Acquiring => write!(f, "Acquiring"),
            AcquisitionMode::Streaming => write!(f, "Streaming"),
            AcquisitionMode::BackgroundAcquiring => write!(f, "BackgroundAcquiring"),
            AcquisitionMode::DeviceSpecific => write!(f, "DeviceSpecific"),
        }
    }
}

impl AcquisitionMode {
    /// Check if nothing is running.
    pub fn is_idle(&self) -> bool {
        matches!(self, AcquisitionMode::Idle)
    }

    /// Check if a foreground run or stream is active. Settings, calibration
    /// switches and run scans are locked in these modes.
    pub fn is_foreground(&self) -> bool {
        matches!(self, AcquisitionMode::Acquiring | AcquisitionMode::Streaming)
    }
}

/// Control-unit health as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlUnitStatus {
    /// Healthy
    Ok,
    /// Alarm with the device fault code
    Alarm(i64),
    /// Not reported yet, or the device is unreachable
    Unknown,
}

impl ControlUnitStatus {
    /// Map a device code; anything but `0` and `99` is an alarm.
    pub fn from_code(code: i64) -> Self {
        match code {
            CONTROL_UNIT_OK => ControlUnitStatus::Ok,
            STATUS_UNKNOWN => ControlUnitStatus::Unknown,
            other => ControlUnitStatus::Alarm(other),
        }
    }

    /// Device code for this status.
    pub fn code(&self) -> i64 {
        match self {
            ControlUnitStatus::Ok => CONTROL_UNIT_OK,
            ControlUnitStatus::Alarm(code) => *code,
            ControlUnitStatus::Unknown => STATUS_UNKNOWN,
        }
    }

    /// Check if the control unit is in alarm.
    pub fn is_alarm(&self) -> bool {
        matches!(self, ControlUnitStatus::Alarm(_))
    }
}

impl fmt::Display for ControlUnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlUnitStatus::Ok => write!(f, "Ok"),
            ControlUnitStatus::Alarm(code) => write!(f, "Alarm({code})"),
            ControlUnitStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// High-voltage module status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HvStatus {
    /// High voltage switched off
    Off,
    /// On and within the nominal range
    OnInRange,
    /// On but outside the nominal range
    OutOfRange,
    /// Not reported yet, or the device is unreachable
    Unknown,
}

impl HvStatus {
    /// Map a device code; unrecognized codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(HvStatus::Off),
            1 => Some(HvStatus::OnInRange),
            2 => Some(HvStatus::OutOfRange),
            STATUS_UNKNOWN => Some(HvStatus::Unknown),
            _ => None,
        }
    }

    /// Device code for this status.
    pub fn code(&self) -> i64 {
        match self {
            HvStatus::Off => 0,
            HvStatus::OnInRange => 1,
            HvStatus::OutOfRange => 2,
            HvStatus::Unknown => STATUS_UNKNOWN,
        }
    }
}

impl fmt::Display for HvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HvStatus::Off => write!(f, "Off"),
            HvStatus::OnInRange => write!(f, "OnInRange"),
            HvStatus::OutOfRange => write!(f, "OutOfRange"),
            HvStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Snapshot of the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Current acquisition mode
    pub mode: AcquisitionMode,
    /// Control-unit indicator
    pub control_unit: ControlUnitStatus,
    /// `None` when the device has no HV module.
    pub hv: Option<HvStatus>,
}

/// Outcome of a legality check for a start/stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Request refused; show the notification.
    Reject(Notification),
    /// The mode is running and the request stops it.
    Stop,
    /// Start right away.
    Start,
    /// Start only after the operator confirms (HV off).
    ConfirmStart,
}

/// Which start request a [`Transition`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartKind {
    /// Foreground DAQ run
    Acquisition,
    /// Live data stream
    Streaming,
    /// Background reference run
    Background,
}

impl StartKind {
    /// Text of the HV-off confirmation prompt.
    pub fn hv_prompt(&self) -> &'static str {
        match self {
            StartKind::Acquisition => "HV is off or out of range. Are you sure to start DAQ?",
            StartKind::Streaming => {
                "HV is off or out of range. Are you sure to start data streaming?"
            }
            StartKind::Background => {
                "HV is off or out of range. Are you sure to start background DAQ?"
            }
        }
    }
}

const CLEAR_ALARMS: &str = "Internal error! CLEAR ALARMS and try again";
const BACKGROUND_RUNNING: &str = "Background acquisition ongoing. It will stop automatically!";

/// Owner of the acquisition mode and status indicators.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    manual_sampling: bool,
}

impl SessionStateMachine {
    /// Start in `Idle` with both indicators `Unknown`.
    pub fn new(has_hv: bool) -> Self {
        Self {
            state: SessionState {
                mode: AcquisitionMode::Idle,
                control_unit: ControlUnitStatus::Unknown,
                hv: has_hv.then_some(HvStatus::Unknown),
            },
            manual_sampling: true,
        }
    }

    /// Current mode and indicators.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current acquisition mode.
    pub fn mode(&self) -> AcquisitionMode {
        self.state.mode
    }

    /// Control-unit indicator.
    pub fn control_unit(&self) -> ControlUnitStatus {
        self.state.control_unit
    }

    /// HV indicator, `None` without an HV module.
    pub fn hv(&self) -> Option<HvStatus> {
        self.state.hv
    }

    /// Record whether the sampling mode is manual; the sampling-rate control is
    /// only enabled in manual mode once the session is idle.
    pub fn set_manual_sampling(&mut self, manual: bool) {
        self.manual_sampling = manual;
    }

    /// Update the control-unit indicator.
    pub fn set_control_unit(&mut self, status: ControlUnitStatus) -> Vec<Effect> {
        if self.state.control_unit != status {
            debug!(from = %self.state.control_unit, to = %status, "Control unit status changed");
        }
        self.state.control_unit = status;
        vec![Effect::Ui(UiUpdate::ControlUnit(status))]
    }

    /// Update the HV indicator. Ignored when the device has no HV module.
    pub fn set_hv(&mut self, status: HvStatus) -> Vec<Effect> {
        match self.state.hv {
            Some(_) => {
                self.state.hv = Some(status);
                vec![Effect::Ui(UiUpdate::Hv(status))]
            }
            None => {
                debug!(%status, "HV status ignored: no HV module");
                Vec::new()
            }
        }
    }

    fn hv_gate(&self) -> Transition {
        if self.state.hv == Some(HvStatus::Off) {
            Transition::ConfirmStart
        } else {
            Transition::Start
        }
    }

    /// Legality of toggling a foreground acquisition.
    pub fn plan_toggle_acquisition(&self) -> Transition {
        if self.state.control_unit.is_alarm() {
            return Transition::Reject(Notification::error(CLEAR_ALARMS));
        }
        match self.state.mode {
            AcquisitionMode::Acquiring => Transition::Stop,
            AcquisitionMode::Streaming => Transition::Reject(Notification::warning(
                "Data streaming ongoing. Stop data streaming before starting an acquisition!",
            )),
            AcquisitionMode::BackgroundAcquiring => {
                Transition::Reject(Notification::warning(BACKGROUND_RUNNING))
            }
            AcquisitionMode::DeviceSpecific => Transition::Reject(Notification::warning(
                "Device busy. Stop the current operation before!",
            )),
            AcquisitionMode::Idle => self.hv_gate(),
        }
    }

    /// Legality of toggling data streaming.
    pub fn plan_toggle_streaming(&self) -> Transition {
        if self.state.control_unit.is_alarm() {
            return Transition::Reject(Notification::error(CLEAR_ALARMS));
        }
        match self.state.mode {
            AcquisitionMode::Streaming => Transition::Stop,
            AcquisitionMode::Acquiring | AcquisitionMode::BackgroundAcquiring => {
                Transition::Reject(Notification::warning(
                    "DAQ ongoing. Stop DAQ before starting data streaming!",
                ))
            }
            AcquisitionMode::DeviceSpecific => Transition::Reject(Notification::warning(
                "Device busy. Stop the current operation before!",
            )),
            AcquisitionMode::Idle => self.hv_gate(),
        }
    }

    /// Legality of recording a background reference. Never yields `Stop`: the
    /// device ends background runs itself.
    pub fn plan_background(&self) -> Transition {
        if self.state.control_unit.is_alarm() {
            return Transition::Reject(Notification::error(CLEAR_ALARMS));
        }
        match self.state.mode {
            AcquisitionMode::Streaming => Transition::Reject(Notification::warning(
                "Data streaming ongoing. Stop data streaming before starting a background acquisition!",
            )),
            AcquisitionMode::Acquiring => Transition::Reject(Notification::warning(
                "DAQ ongoing. Stop DAQ before starting a background acquisition!",
            )),
            AcquisitionMode::BackgroundAcquiring => {
                Transition::Reject(Notification::warning(BACKGROUND_RUNNING))
            }
            AcquisitionMode::DeviceSpecific => Transition::Reject(Notification::warning(
                "Device busy. Stop the current operation before!",
            )),
            AcquisitionMode::Idle => self.hv_gate(),
        }
    }

    /// Legality check dispatched by start kind.
    pub fn plan(&self, kind: StartKind) -> Transition {
        match kind {
            StartKind::Acquisition => self.plan_toggle_acquisition(),
            StartKind::Streaming => self.plan_toggle_streaming(),
            StartKind::Background => self.plan_background(),
        }
    }

    /// Enter a running mode and send its start command.
    ///
    /// `settings` must be the snapshot built for this start: foreground settings
    /// for acquisition and streaming, background settings otherwise.
    pub fn start(&mut self, kind: StartKind, settings: &Settings) -> Vec<Effect> {
        let (notification, command, mode) = match kind {
            StartKind::Acquisition => (
                Notification::info("DAQ starting..."),
                Command::measure_start(settings),
                AcquisitionMode::Acquiring,
            ),
            StartKind::Streaming => (
                Notification::success("Data stream starting..."),
                Command::start_data_stream(settings),
                AcquisitionMode::Streaming,
            ),
            StartKind::Background => (
                Notification::success("Background DAQ starting..."),
                Command::bkg_measure_start(settings),
                AcquisitionMode::BackgroundAcquiring,
            ),
        };
        info!(%mode, run = %settings.datetime, "Starting");
        let mut effects = vec![Effect::Notify(notification), Effect::Transmit(command)];
        effects.extend(self.enter(mode));
        effects
    }

    /// Explicit stop request.
    ///
    /// No-op when idle. Background runs cannot be stopped from the client.
    pub fn request_stop(&mut self) -> Vec<Effect> {
        match self.state.mode {
            AcquisitionMode::Idle => Vec::new(),
            AcquisitionMode::BackgroundAcquiring => {
                vec![Effect::Notify(Notification::warning(BACKGROUND_RUNNING))]
            }
            AcquisitionMode::Acquiring
            | AcquisitionMode::Streaming
            | AcquisitionMode::DeviceSpecific => {
                info!(mode = %self.state.mode, "Stopping");
                let mut effects = vec![Effect::Transmit(Command::measure_stop())];
                effects.extend(self.exit());
                effects
            }
        }
    }

    /// The device ended the run on its own (`DAQ_end`).
    pub fn on_device_acquisition_ended(&mut self) -> Vec<Effect> {
        let prior = self.state.mode;
        info!(mode = %prior, "Device ended acquisition");
        let mut effects = self.force_idle();
        if prior == AcquisitionMode::Acquiring {
            effects.push(Effect::Ui(UiUpdate::Dialog(Dialog::SaveRun)));
        }
        effects
    }

    /// The device finished a background run and stored it under `filename`.
    pub fn on_background_completed(&mut self, filename: &str) -> Vec<Effect> {
        info!(%filename, "Background acquisition completed");
        let mut effects = vec![Effect::Notify(Notification::success(
            "Background acquisition completed",
        ))];
        effects.extend(self.force_idle());
        effects.push(Effect::Ui(UiUpdate::Dialog(Dialog::SaveBackground {
            filename: filename.to_string(),
        })));
        effects
    }

    /// The link dropped without an orderly stop.
    pub fn on_abnormal_disconnection(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.state.mode {
            AcquisitionMode::Acquiring => effects.push(Effect::Notify(Notification::error(
                "DAQ aborted by unexpected disconnection! The device will try to save the \
                 acquired data with comment <<Run aborted by unexpected client disconnection. \
                 CHECK THE DATA>>.",
            ))),
            AcquisitionMode::Streaming => effects.push(Effect::Notify(Notification::error(
                "Data streaming aborted by unexpected disconnection!",
            ))),
            _ => {}
        }
        effects.extend(self.force_idle());
        effects.extend(self.set_control_unit(ControlUnitStatus::Unknown));
        effects.extend(self.set_hv(HvStatus::Unknown));
        effects
    }

    /// Return to idle without sending anything. Returns no effects when
    /// already idle.
    pub fn force_idle(&mut self) -> Vec<Effect> {
        if self.state.mode.is_idle() {
            return Vec::new();
        }
        self.exit()
    }

    fn enter(&mut self, mode: AcquisitionMode) -> Vec<Effect> {
        self.state.mode = mode;
        vec![
            Effect::Ui(UiUpdate::AcquisitionMode(mode)),
            Effect::Ui(UiUpdate::ResetPlots),
            Effect::Ui(UiUpdate::Interaction(InteractionState::locked())),
        ]
    }

    fn exit(&mut self) -> Vec<Effect> {
        debug!(from = %self.state.mode, "Returning to idle");
        self.state.mode = AcquisitionMode::Idle;
        vec![
            Effect::Ui(UiUpdate::AcquisitionMode(AcquisitionMode::Idle)),
            Effect::Ui(UiUpdate::Interaction(InteractionState::released(
                self.manual_sampling,
            ))),
        ]
    }
}
