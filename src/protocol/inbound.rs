//! Inbound message catalog and decoding.
//!
//! Every action the device can send is an [`ActionKind`]. Decoding turns a raw
//! frame into a typed [`InboundMessage`]; frames without an action, with an
//! unknown action, or with a payload that does not fit the action fail with a
//! decode error and are dropped by the dispatcher.

use super::envelope::{payload, Envelope};
use crate::alarms::{ErrorKind, TRIGGERED_ERROR_CODE};
use crate::calibration::{CalibrationKind, CalibrationRecord};
use crate::catalog::{zip_runs, FileCatalogKind, ListPresentation, RunEntry, RunKind};
use crate::effects::Notification;
use crate::error::{AppResult, SessionError};
use crate::state::{ControlUnitStatus, HvStatus};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// Routing family of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageFamily {
    /// Keepalive and handshake
    Connection,
    /// Run lifecycle driven by the device
    Acquisition,
    /// Live and stored plot data
    PlotData,
    /// Status telemetry and device-reported errors
    Status,
    /// Logger replies: file lists, loads, acknowledgements
    Logbook,
}

impl fmt::Display for MessageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageFamily::Connection => write!(f, "connection"),
            MessageFamily::Acquisition => write!(f, "acquisition"),
            MessageFamily::PlotData => write!(f, "plot"),
            MessageFamily::Status => write!(f, "status"),
            MessageFamily::Logbook => write!(f, "logbook"),
        }
    }
}

/// Every action the device may send. Variants mirror the wire names returned
/// by [`ActionKind::as_str`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Watchdog,
    Connected,
    DaqEnd,
    SaveBackground,
    GraphProfileXInt,
    GraphProfileXDiff,
    GraphProfileYInt,
    GraphProfileYDiff,
    GraphInt1,
    GraphInt1Diff,
    GraphInt2,
    GraphInt2Diff,
    LoadInt1,
    LoadInt1Diff,
    LoadInt2,
    LoadInt2Diff,
    CountersResetDone,
    FpgaHv,
    DeviceStatus,
    MemoryUpdate,
    FpgaSamplingMode,
    FpgaSamplingRate,
    UpdateErrorList,
    TriggerWarning,
    TriggerError,
    ErrorList,
    Message,
    UpdateProfileCalibList,
    UpdateProfileCalibListHidden,
    UpdateProfileCalibListInit,
    UpdateRangeCalibList,
    UpdateRangeCalibListHidden,
    UpdateRangeCalibListInit,
    LoadProfileCalib,
    LoadRangeCalib,
    UpdateBackgroundList,
    UpdateBackgroundListHidden,
    UpdateBackgroundListInit,
    ProfileRunList,
    IntRunList,
    RangeRunList,
    DownloadFiles,
    BackgroundFilesSaved,
    RunSaved,
    NotesFileEdited,
    FileDeleted,
    CalibrationSaved,
}

impl ActionKind {
    /// Every action, in catalog order.
    pub const ALL: [ActionKind; 47] = [
        ActionKind::Watchdog,
        ActionKind::Connected,
        ActionKind::DaqEnd,
        ActionKind::SaveBackground,
        ActionKind::GraphProfileXInt,
        ActionKind::GraphProfileXDiff,
        ActionKind::GraphProfileYInt,
        ActionKind::GraphProfileYDiff,
        ActionKind::GraphInt1,
        ActionKind::GraphInt1Diff,
        ActionKind::GraphInt2,
        ActionKind::GraphInt2Diff,
        ActionKind::LoadInt1,
        ActionKind::LoadInt1Diff,
        ActionKind::LoadInt2,
        ActionKind::LoadInt2Diff,
        ActionKind::CountersResetDone,
        ActionKind::FpgaHv,
        ActionKind::DeviceStatus,
        ActionKind::MemoryUpdate,
        ActionKind::FpgaSamplingMode,
        ActionKind::FpgaSamplingRate,
        ActionKind::UpdateErrorList,
        ActionKind::TriggerWarning,
        ActionKind::TriggerError,
        ActionKind::ErrorList,
        ActionKind::Message,
        ActionKind::UpdateProfileCalibList,
        ActionKind::UpdateProfileCalibListHidden,
        ActionKind::UpdateProfileCalibListInit,
        ActionKind::UpdateRangeCalibList,
        ActionKind::UpdateRangeCalibListHidden,
        ActionKind::UpdateRangeCalibListInit,
        ActionKind::LoadProfileCalib,
        ActionKind::LoadRangeCalib,
        ActionKind::UpdateBackgroundList,
        ActionKind::UpdateBackgroundListHidden,
        ActionKind::UpdateBackgroundListInit,
        ActionKind::ProfileRunList,
        ActionKind::IntRunList,
        ActionKind::RangeRunList,
        ActionKind::DownloadFiles,
        ActionKind::BackgroundFilesSaved,
        ActionKind::RunSaved,
        ActionKind::NotesFileEdited,
        ActionKind::FileDeleted,
        ActionKind::CalibrationSaved,
    ];

    /// Look up an action by its wire name.
    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == action)
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Watchdog => "watchdog",
            ActionKind::Connected => "connected",
            ActionKind::DaqEnd => "DAQ_end",
            ActionKind::SaveBackground => "save_background",
            ActionKind::GraphProfileXInt => "graph_profile_x_int",
            ActionKind::GraphProfileXDiff => "graph_profile_x_diff",
            ActionKind::GraphProfileYInt => "graph_profile_y_int",
            ActionKind::GraphProfileYDiff => "graph_profile_y_diff",
            ActionKind::GraphInt1 => "graph_int_1",
            ActionKind::GraphInt1Diff => "graph_int_1_diff",
            ActionKind::GraphInt2 => "graph_int_2",
            ActionKind::GraphInt2Diff => "graph_int_2_diff",
            ActionKind::LoadInt1 => "load_int_1",
            ActionKind::LoadInt1Diff => "load_int_1_diff",
            ActionKind::LoadInt2 => "load_int_2",
            ActionKind::LoadInt2Diff => "load_int_2_diff",
            ActionKind::CountersResetDone => "counters_reset_done",
            ActionKind::FpgaHv => "fpga_hv",
            ActionKind::DeviceStatus => "device_status",
            ActionKind::MemoryUpdate => "memory_update",
            ActionKind::FpgaSamplingMode => "fpga_sampling_mode",
            ActionKind::FpgaSamplingRate => "fpga_sampling_rate",
            ActionKind::UpdateErrorList => "update_error_list",
            ActionKind::TriggerWarning => "trigger_warning",
            ActionKind::TriggerError => "trigger_error",
            ActionKind::ErrorList => "error_list",
            ActionKind::Message => "message",
            ActionKind::UpdateProfileCalibList => "update_profile_calib_list",
            ActionKind::UpdateProfileCalibListHidden => "update_profile_calib_list_hidden",
            ActionKind::UpdateProfileCalibListInit => "update_profile_calib_list_init",
            ActionKind::UpdateRangeCalibList => "update_range_calib_list",
            ActionKind::UpdateRangeCalibListHidden => "update_range_calib_list_hidden",
            ActionKind::UpdateRangeCalibListInit => "update_range_calib_list_init",
            ActionKind::LoadProfileCalib => "load_profile_calib",
            ActionKind::LoadRangeCalib => "load_range_calib",
            ActionKind::UpdateBackgroundList => "update_background_list",
            ActionKind::UpdateBackgroundListHidden => "update_background_list_hidden",
            ActionKind::UpdateBackgroundListInit => "update_background_list_init",
            ActionKind::ProfileRunList => "profile_run_list",
            ActionKind::IntRunList => "int_run_list",
            ActionKind::RangeRunList => "range_run_list",
            ActionKind::DownloadFiles => "download_files",
            ActionKind::BackgroundFilesSaved => "background_files_saved",
            ActionKind::RunSaved => "run_saved",
            ActionKind::NotesFileEdited => "notes_file_edited",
            ActionKind::FileDeleted => "file_deleted",
            ActionKind::CalibrationSaved => "calibration_saved",
        }
    }

    /// Handling family of this action.
    pub fn family(&self) -> MessageFamily {
        use ActionKind::*;
        match self {
            Watchdog | Connected => MessageFamily::Connection,
            DaqEnd | SaveBackground => MessageFamily::Acquisition,
            GraphProfileXInt | GraphProfileXDiff | GraphProfileYInt | GraphProfileYDiff
            | GraphInt1 | GraphInt1Diff | GraphInt2 | GraphInt2Diff | LoadInt1 | LoadInt1Diff
            | LoadInt2 | LoadInt2Diff | CountersResetDone => MessageFamily::PlotData,
            FpgaHv | DeviceStatus | MemoryUpdate | FpgaSamplingMode | FpgaSamplingRate
            | UpdateErrorList | TriggerWarning | TriggerError | ErrorList | Message => {
                MessageFamily::Status
            }
            UpdateProfileCalibList
            | UpdateProfileCalibListHidden
            | UpdateProfileCalibListInit
            | UpdateRangeCalibList
            | UpdateRangeCalibListHidden
            | UpdateRangeCalibListInit
            | LoadProfileCalib
            | LoadRangeCalib
            | UpdateBackgroundList
            | UpdateBackgroundListHidden
            | UpdateBackgroundListInit
            | ProfileRunList
            | IntRunList
            | RangeRunList
            | DownloadFiles
            | BackgroundFilesSaved
            | RunSaved
            | NotesFileEdited
            | FileDeleted
            | CalibrationSaved => MessageFamily::Logbook,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile plot axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileAxis {
    /// X profile
    X,
    /// Y profile
    Y,
}

/// Integrated or differential view of a plot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotView {
    /// Integrated series
    Integrated,
    /// Differential series
    Differential,
}

/// Which chart a data series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotTarget {
    /// Beam profile along one axis
    Profile {
        /// Profile axis
        axis: ProfileAxis,
        /// Integrated or differential
        view: PlotView,
    },
    /// Integral chamber channel
    Integral {
        /// Channel number, starting at 1
        channel: u8,
        /// Integrated or differential
        view: PlotView,
    },
}

/// Live acquisition data or a run loaded from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotSource {
    /// Running acquisition or stream
    Live,
    /// Run loaded from the logbook
    Stored,
}

/// A data series for one chart.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotUpdate {
    /// Chart to draw on
    pub target: PlotTarget,
    /// Live or stored data
    pub source: PlotSource,
    /// Series as sent by the device
    pub data: Value,
}

/// Logger confirmations that only need a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Acknowledgement {
    /// `background_files_saved`
    BackgroundSaved,
    /// `run_saved`
    RunSaved,
    /// `notes_file_edited`
    NotesEdited,
    /// `file_deleted`
    FileDeleted,
    /// `calibration_saved`
    CalibrationSaved,
}

impl Acknowledgement {
    /// What the operator is told.
    pub fn notification(&self) -> Notification {
        match self {
            Acknowledgement::BackgroundSaved => {
                Notification::success("Background acquisition successfully saved")
            }
            Acknowledgement::RunSaved => Notification::success("Run successfully saved"),
            Acknowledgement::NotesEdited => {
                Notification::success("Notes file successfully edited")
            }
            Acknowledgement::FileDeleted => Notification::error("Data deleted from memory"),
            Acknowledgement::CalibrationSaved => {
                Notification::success("Calibration successfully saved")
            }
        }
    }
}

/// A decoded device message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Keepalive
    Watchdog,
    /// Handshake reply
    Connected {
        /// Control-unit status reported with the handshake
        control_unit: ControlUnitStatus,
    },
    /// `DAQ_end`: the device stopped the run
    AcquisitionEnded,
    /// A background run finished and was stored
    BackgroundCompleted {
        /// Temporary name given by the device
        filename: String,
    },
    /// Chart data
    Plot(PlotUpdate),
    /// Counters were zeroed
    CountersReset,
    /// HV module status
    Hv(HvStatus),
    /// Control-unit status
    DeviceStatus(ControlUnitStatus),
    /// Memory usage
    Memory(Value),
    /// Sampling modes offered by the device
    SamplingModeOptions(Value),
    /// Sampling rates offered by the device
    SamplingRateOptions(Value),
    /// Warning or error raised by the device
    DeviceError {
        /// Warning, or error with its code
        kind: ErrorKind,
        /// Device text
        message: String,
    },
    /// Device-side error list
    ErrorList(Value),
    /// Free-form device message
    DeviceMessage(Value),
    /// File names of one catalog
    FileList {
        /// Catalog the names belong to
        catalog: FileCatalogKind,
        /// Selector or logbook listing
        presentation: ListPresentation,
        /// File names
        files: Vec<String>,
    },
    /// Contents of a stored calibration file
    CalibrationLoaded {
        /// Position or range
        kind: CalibrationKind,
        /// Stored record
        record: CalibrationRecord,
    },
    /// Stored runs with notes
    RunList {
        /// Run family
        kind: RunKind,
        /// Rows
        entries: Vec<RunEntry>,
    },
    /// Archive ready for download
    Download {
        /// Location of the archive
        url: String,
    },
    /// Logger confirmation
    Acknowledged(Acknowledgement),
}

#[derive(Deserialize)]
struct FileListPayload {
    list: Vec<String>,
}

#[derive(Deserialize)]
struct RunListPayload {
    run_list: Vec<String>,
    #[serde(default)]
    notes_list: Vec<String>,
}

fn plot(target: PlotTarget, source: PlotSource, value: Option<&Value>) -> InboundMessage {
    InboundMessage::Plot(PlotUpdate {
        target,
        source,
        data: payload::lenient(value),
    })
}

fn profile(axis: ProfileAxis, view: PlotView) -> PlotTarget {
    PlotTarget::Profile { axis, view }
}

fn integral(channel: u8, view: PlotView) -> PlotTarget {
    PlotTarget::Integral { channel, view }
}

fn file_list(
    action: &str,
    value: Option<&Value>,
    catalog: FileCatalogKind,
    presentation: ListPresentation,
) -> AppResult<InboundMessage> {
    let list: FileListPayload = payload::typed(action, value)?;
    Ok(InboundMessage::FileList {
        catalog,
        presentation,
        files: list.list,
    })
}

fn run_list(action: &str, value: Option<&Value>, kind: RunKind) -> AppResult<InboundMessage> {
    let runs: RunListPayload = payload::typed(action, value)?;
    Ok(InboundMessage::RunList {
        kind,
        entries: zip_runs(runs.run_list, runs.notes_list),
    })
}

impl InboundMessage {
    /// Build the typed message for a recognized action.
    pub fn from_envelope(kind: ActionKind, envelope: &Envelope) -> AppResult<Self> {
        use ActionKind as A;
        use PlotSource::{Live, Stored};
        use PlotView::{Differential, Integrated};

        let action = kind.as_str();
        let value = envelope.value.as_ref();

        let message = match kind {
            A::Watchdog => InboundMessage::Watchdog,
            A::Connected => InboundMessage::Connected {
                control_unit: ControlUnitStatus::from_code(payload::type_code(action, value)?),
            },
            A::DaqEnd => InboundMessage::AcquisitionEnded,
            A::SaveBackground => InboundMessage::BackgroundCompleted {
                filename: payload::text(action, value)?,
            },
            A::GraphProfileXInt => plot(profile(ProfileAxis::X, Integrated), Live, value),
            A::GraphProfileXDiff => plot(profile(ProfileAxis::X, Differential), Live, value),
            A::GraphProfileYInt => plot(profile(ProfileAxis::Y, Integrated), Live, value),
            A::GraphProfileYDiff => plot(profile(ProfileAxis::Y, Differential), Live, value),
            A::GraphInt1 => plot(integral(1, Integrated), Live, value),
            A::GraphInt1Diff => plot(integral(1, Differential), Live, value),
            A::GraphInt2 => plot(integral(2, Integrated), Live, value),
            A::GraphInt2Diff => plot(integral(2, Differential), Live, value),
            A::LoadInt1 => plot(integral(1, Integrated), Stored, value),
            A::LoadInt1Diff => plot(integral(1, Differential), Stored, value),
            A::LoadInt2 => plot(integral(2, Integrated), Stored, value),
            A::LoadInt2Diff => plot(integral(2, Differential), Stored, value),
            A::CountersResetDone => InboundMessage::CountersReset,
            A::FpgaHv => {
                let code = payload::code(action, value)?;
                let status = HvStatus::from_code(code).ok_or_else(|| {
                    SessionError::malformed(action, format!("unknown HV code {code}"))
                })?;
                InboundMessage::Hv(status)
            }
            A::DeviceStatus => InboundMessage::DeviceStatus(ControlUnitStatus::from_code(
                payload::type_code(action, value)?,
            )),
            A::MemoryUpdate => InboundMessage::Memory(payload::lenient(value)),
            A::FpgaSamplingMode => InboundMessage::SamplingModeOptions(payload::lenient(value)),
            A::FpgaSamplingRate => InboundMessage::SamplingRateOptions(payload::lenient(value)),
            A::UpdateErrorList => InboundMessage::DeviceError {
                kind: ErrorKind::from_type_code(payload::code(action, envelope.code.as_ref())?),
                message: payload::text(action, value)?,
            },
            A::TriggerWarning => InboundMessage::DeviceError {
                kind: ErrorKind::Warning,
                message: payload::text(action, value)?,
            },
            A::TriggerError => InboundMessage::DeviceError {
                kind: ErrorKind::Error(TRIGGERED_ERROR_CODE),
                message: payload::text(action, value)?,
            },
            A::ErrorList => InboundMessage::ErrorList(payload::lenient(value)),
            A::Message => InboundMessage::DeviceMessage(payload::lenient(value)),
            A::UpdateProfileCalibList => file_list(
                action,
                value,
                FileCatalogKind::PositionCalibration,
                ListPresentation::Modal,
            )?,
            A::UpdateProfileCalibListHidden => file_list(
                action,
                value,
                FileCatalogKind::PositionCalibration,
                ListPresentation::Hidden,
            )?,
            A::UpdateProfileCalibListInit => file_list(
                action,
                value,
                FileCatalogKind::PositionCalibration,
                ListPresentation::Init,
            )?,
            A::UpdateRangeCalibList => file_list(
                action,
                value,
                FileCatalogKind::RangeCalibration,
                ListPresentation::Modal,
            )?,
            A::UpdateRangeCalibListHidden => file_list(
                action,
                value,
                FileCatalogKind::RangeCalibration,
                ListPresentation::Hidden,
            )?,
            A::UpdateRangeCalibListInit => file_list(
                action,
                value,
                FileCatalogKind::RangeCalibration,
                ListPresentation::Init,
            )?,
            A::LoadProfileCalib => InboundMessage::CalibrationLoaded {
                kind: CalibrationKind::Position,
                record: payload::typed(action, value)?,
            },
            A::LoadRangeCalib => InboundMessage::CalibrationLoaded {
                kind: CalibrationKind::Range,
                record: payload::typed(action, value)?,
            },
            A::UpdateBackgroundList => file_list(
                action,
                value,
                FileCatalogKind::Background,
                ListPresentation::Modal,
            )?,
            A::UpdateBackgroundListHidden => file_list(
                action,
                value,
                FileCatalogKind::Background,
                ListPresentation::Hidden,
            )?,
            A::UpdateBackgroundListInit => file_list(
                action,
                value,
                FileCatalogKind::Background,
                ListPresentation::Init,
            )?,
            A::ProfileRunList => run_list(action, value, RunKind::Position)?,
            A::IntRunList => run_list(action, value, RunKind::Integral)?,
            A::RangeRunList => run_list(action, value, RunKind::Range)?,
            A::DownloadFiles => InboundMessage::Download {
                url: payload::text(action, value)?,
            },
            A::BackgroundFilesSaved => InboundMessage::Acknowledged(Acknowledgement::BackgroundSaved),
            A::RunSaved => InboundMessage::Acknowledged(Acknowledgement::RunSaved),
            A::NotesFileEdited => InboundMessage::Acknowledged(Acknowledgement::NotesEdited),
            A::FileDeleted => InboundMessage::Acknowledged(Acknowledgement::FileDeleted),
            A::CalibrationSaved => InboundMessage::Acknowledged(Acknowledgement::CalibrationSaved),
        };
        Ok(message)
    }
}

/// Decode a raw frame into its action and typed message.
pub fn decode(raw: &str) -> AppResult<(ActionKind, InboundMessage)> {
    let envelope = Envelope::parse(raw)?;
    let action = envelope.action.as_deref().ok_or(SessionError::MissingAction)?;
    let kind = ActionKind::from_action(action)
        .ok_or_else(|| SessionError::UnknownAction(action.to_string()))?;
    let message = InboundMessage::from_envelope(kind, &envelope)?;
    Ok((kind, message))
}
