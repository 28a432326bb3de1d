//! Operator requests.
//!
//! Every button, switch and dialog answer of the client maps to a
//! [`UserIntent`]. Legality is checked against the current state before
//! anything is sent; destructive or risky requests go through a confirmation
//! first.

use super::confirm::PendingAction;
use super::DeviceSession;
use crate::calibration::{sanitize_filename, validate_upload, CalibrationKind, CalibrationRecord};
use crate::catalog::{FileCatalogKind, RunKind};
use crate::effects::{Dialog, Effect, InteractionState, Notification, UiUpdate};
use crate::protocol::Command;
use crate::settings::Switch;
use crate::state::{AcquisitionMode, ControlUnitStatus, StartKind, Transition};
use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

const RUN_ONGOING: &str = "DAQ ongoing. Stop data streaming before!";

/// Something the operator asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum UserIntent {
    /// Start or stop a foreground DAQ run.
    ToggleAcquisition,
    /// Start or stop live data streaming.
    ToggleStreaming,
    /// Record a background reference run.
    RecordBackground,
    /// Stop whatever is running.
    Stop,
    /// Clear device alarms and the local error log.
    ResetAlarms,
    /// Zero the device counters.
    ResetCounters,
    /// Show what the control-unit indicator means right now.
    InspectControlUnit,

    /// Pick a sampling mode by its device code.
    SelectSamplingMode(String),
    /// Pick a sampling rate.
    SelectSamplingRate(String),
    /// Pick the first integral channel.
    SelectFirstChannel(String),
    /// Pick or clear the calibration file of one kind.
    SelectCalibrationFile {
        /// Position or range
        kind: CalibrationKind,
        /// `None` clears the selection
        file: Option<String>,
    },
    /// Pick or clear the background file.
    SelectBackgroundFile(Option<String>),
    /// Flip a switch.
    SetSwitch {
        /// Which switch
        switch: Switch,
        /// Requested position
        on: bool,
    },

    /// List stored runs of one family.
    ScanRuns(RunKind),
    /// List stored calibration files.
    ScanCalibrations {
        /// Position or range
        kind: CalibrationKind,
        /// Refresh the cache without opening the listing
        hidden: bool,
    },
    /// List stored background files.
    ScanBackgrounds,
    /// Plot a stored integral run.
    LoadIntegralRun {
        /// Run name
        run: String,
        /// Apply a calibration file while loading
        use_calib: bool,
        /// Calibration file to apply
        calib_file: String,
    },
    /// Replace the notes of a stored run.
    EditNotes {
        /// Run name
        run: String,
        /// Notes currently stored
        old_notes: String,
        /// Replacement
        new_notes: String,
    },
    /// Delete stored runs, after confirmation.
    DeleteRuns {
        /// Run family
        kind: RunKind,
        /// Run names
        names: Vec<String>,
    },
    /// Download stored runs, after confirmation.
    DownloadRuns {
        /// Run family
        kind: RunKind,
        /// Run names
        names: Vec<String>,
    },

    /// Load a stored calibration file into the factor tables.
    LoadCalibrationFile {
        /// Position or range
        kind: CalibrationKind,
        /// Stored file name
        name: String,
    },
    /// Delete a stored calibration file, after confirmation.
    DeleteCalibrationFile {
        /// Position or range
        kind: CalibrationKind,
        /// Stored file name
        name: String,
    },
    /// Apply the contents of a local calibration file.
    UploadCalibration {
        /// Position or range
        kind: CalibrationKind,
        /// File text
        content: String,
    },
    /// Set every factor of one kind back to 1, after confirmation.
    ResetCalibration(CalibrationKind),
    /// Store the current factors on the device.
    SaveCalibration {
        /// Position or range
        kind: CalibrationKind,
        /// Target file name
        filename: String,
    },

    /// Delete a stored background file, after confirmation.
    DeleteBackground {
        /// Stored file name
        name: String,
    },
    /// Download a stored background file, after confirmation.
    DownloadBackground {
        /// Stored file name
        name: String,
    },

    /// Answer to the save/discard dialog after a run.
    SaveRun {
        /// Run notes
        notes: String,
    },
    /// Drop the run that just ended.
    DiscardRun,
    /// Answer to the save/discard dialog after a background run.
    SaveBackground {
        /// Name to keep the recording under
        name: String,
    },
    /// Drop the background run that just ended.
    DiscardBackground,
}

fn calibration_catalog(kind: CalibrationKind) -> FileCatalogKind {
    match kind {
        CalibrationKind::Position => FileCatalogKind::PositionCalibration,
        CalibrationKind::Range => FileCatalogKind::RangeCalibration,
    }
}

fn count_prompt(verb: &str, count: usize) -> String {
    if count > 1 {
        format!("Are you sure to {verb} {count} runs? ")
    } else {
        format!("Are you sure to {verb} this run ?")
    }
}

impl DeviceSession {
    /// Apply an operator request.
    pub fn apply(&mut self, intent: UserIntent, now: DateTime<Local>) -> Vec<Effect> {
        debug!(?intent, "Operator request");
        let effects = self.apply_intent(intent, now);
        self.gate(effects)
    }

    fn require_connection(&self) -> Option<Vec<Effect>> {
        if self.connection.is_connected() {
            None
        } else {
            Some(vec![Effect::Notify(Notification::connection_error())])
        }
    }

    /// Run a start/stop request through the state machine.
    pub(crate) fn request_start(&mut self, kind: StartKind, now: DateTime<Local>) -> Vec<Effect> {
        if let Some(refused) = self.require_connection() {
            return refused;
        }
        match self.machine.plan(kind) {
            Transition::Reject(notification) => {
                info!(?kind, reason = %notification.message, "Start refused");
                vec![Effect::Notify(notification)]
            }
            Transition::Stop => self.machine.request_stop(),
            Transition::Start => self.start(kind, now),
            Transition::ConfirmStart => self.ask(
                PendingAction::Start(kind),
                "HV off or out of range",
                kind.hv_prompt(),
            ),
        }
    }

    /// Build the settings snapshot for `kind` and start.
    pub(crate) fn start(&mut self, kind: StartKind, now: DateTime<Local>) -> Vec<Effect> {
        let settings = match kind {
            StartKind::Background => self.form.background_snapshot(now),
            StartKind::Acquisition | StartKind::Streaming => self.form.snapshot(now),
        };
        self.machine.start(kind, &settings)
    }

    fn apply_intent(&mut self, intent: UserIntent, now: DateTime<Local>) -> Vec<Effect> {
        let mode = self.machine.mode();
        match intent {
            UserIntent::ToggleAcquisition => self.request_start(StartKind::Acquisition, now),
            UserIntent::ToggleStreaming => self.request_start(StartKind::Streaming, now),
            UserIntent::RecordBackground => self.request_start(StartKind::Background, now),
            UserIntent::Stop => self.machine.request_stop(),

            UserIntent::ResetAlarms => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                info!("Resetting alarms");
                let mut effects = vec![Effect::Transmit(Command::reset_alarms())];
                effects.extend(self.machine.set_control_unit(ControlUnitStatus::Ok));
                self.alarms.reset();
                effects
            }
            UserIntent::ResetCounters => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                match mode {
                    AcquisitionMode::Acquiring => vec![Effect::Notify(Notification::warning(
                        "DAQ ongoing. Stop DAQ before performing a counter reset!",
                    ))],
                    AcquisitionMode::Streaming => {
                        vec![Effect::Transmit(Command::reset_counters(true))]
                    }
                    _ => vec![Effect::Transmit(Command::reset_counters(false))],
                }
            }
            UserIntent::InspectControlUnit => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                match self.machine.control_unit() {
                    ControlUnitStatus::Ok if self.alarms.is_empty() => {
                        vec![Effect::Notify(Notification::success("Everything is fine!"))]
                    }
                    ControlUnitStatus::Unknown => {
                        vec![Effect::Notify(Notification::warning("No connection to the device"))]
                    }
                    _ => vec![Effect::Ui(UiUpdate::Dialog(Dialog::ErrorLog(
                        self.alarms.entries().to_vec(),
                    )))],
                }
            }

            UserIntent::SelectSamplingMode(sampling_mode) => {
                if let Err(refused) = self.form.check_editable(mode) {
                    return vec![Effect::Notify(refused)];
                }
                self.form.sampling_mode = sampling_mode;
                let manual = self.form.sampling_rate_enabled();
                self.machine.set_manual_sampling(manual);
                vec![Effect::Ui(UiUpdate::Interaction(InteractionState::released(
                    manual,
                )))]
            }
            UserIntent::SelectSamplingRate(rate) => {
                if let Err(refused) = self.form.check_editable(mode) {
                    return vec![Effect::Notify(refused)];
                }
                self.form.sampling_rate = rate;
                Vec::new()
            }
            UserIntent::SelectFirstChannel(channel) => {
                if let Err(refused) = self.form.check_editable(mode) {
                    return vec![Effect::Notify(refused)];
                }
                self.form.first_channel = channel;
                Vec::new()
            }
            UserIntent::SelectCalibrationFile { kind, file } => {
                if mode.is_foreground() {
                    return vec![Effect::Notify(Notification::warning(
                        "Data streaming or DAQ ongoing. Stop before!",
                    ))];
                }
                let switch = match kind {
                    CalibrationKind::Position => Switch::PositionCalibration,
                    CalibrationKind::Range => Switch::RangeCalibration,
                };
                let was_on = self.form.switch(switch);
                self.form.select_calibration_file(kind, file);
                if was_on && !self.form.switch(switch) {
                    vec![Effect::Ui(UiUpdate::Switch { switch, on: false })]
                } else {
                    Vec::new()
                }
            }
            UserIntent::SelectBackgroundFile(file) => {
                if let Err(refused) = self.form.check_editable(mode) {
                    return vec![Effect::Notify(refused)];
                }
                let was_on = self.form.switch(Switch::BackgroundSubtraction);
                self.form.select_background_file(file);
                if was_on && !self.form.switch(Switch::BackgroundSubtraction) {
                    vec![Effect::Ui(UiUpdate::Switch {
                        switch: Switch::BackgroundSubtraction,
                        on: false,
                    })]
                } else {
                    Vec::new()
                }
            }
            UserIntent::SetSwitch { switch, on } => match self.form.set_switch(switch, on, mode) {
                Ok(()) => vec![Effect::Ui(UiUpdate::Switch { switch, on })],
                Err(refused) => vec![
                    Effect::Notify(refused),
                    Effect::Ui(UiUpdate::Switch {
                        switch,
                        on: self.form.switch(switch),
                    }),
                ],
            },

            UserIntent::ScanRuns(kind) => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                if mode.is_foreground() {
                    return vec![Effect::Notify(Notification::warning(RUN_ONGOING))];
                }
                vec![Effect::Transmit(Command::scan_runs(kind))]
            }
            UserIntent::ScanCalibrations { kind, hidden } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                // Hidden scans only refresh the cache and may run at any time.
                if !hidden && mode.is_foreground() {
                    return vec![Effect::Notify(Notification::warning(RUN_ONGOING))];
                }
                vec![Effect::Transmit(Command::scan_calibrations(kind, hidden))]
            }
            UserIntent::ScanBackgrounds => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                if !mode.is_idle() {
                    return vec![Effect::Notify(Notification::warning(RUN_ONGOING))];
                }
                vec![Effect::Transmit(Command::scan_backgrounds())]
            }
            UserIntent::LoadIntegralRun {
                run,
                use_calib,
                calib_file,
            } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                vec![
                    Effect::Transmit(Command::load_int_file(&run, use_calib, &calib_file)),
                    Effect::Notify(Notification::warning("Loading run data... Please wait")),
                ]
            }
            UserIntent::EditNotes {
                run,
                old_notes,
                new_notes,
            } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                if old_notes == new_notes {
                    return vec![Effect::Notify(Notification::warning(
                        "The notes have not been modified",
                    ))];
                }
                vec![Effect::Transmit(Command::edit_notes(&run, &old_notes, &new_notes))]
            }
            UserIntent::DeleteRuns { kind, names } => {
                if let Some(refused) = self.run_selection_refusal(kind, &names) {
                    return refused;
                }
                let prompt = count_prompt("delete", names.len());
                self.ask(PendingAction::DeleteRuns { kind, names }, "Delete?", &prompt)
            }
            UserIntent::DownloadRuns { kind, names } => {
                if let Some(refused) = self.run_selection_refusal(kind, &names) {
                    return refused;
                }
                let prompt = count_prompt("download", names.len());
                self.ask(PendingAction::DownloadRuns { kind, names }, "Download?", &prompt)
            }

            UserIntent::LoadCalibrationFile { kind, name } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                vec![Effect::Transmit(Command::load_calibration_file(kind, &name))]
            }
            UserIntent::DeleteCalibrationFile { kind, name } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                self.ask(
                    PendingAction::DeleteCalibrationFile { kind, name },
                    "Delete?",
                    "Are you sure to delete this calibration file?",
                )
            }
            UserIntent::UploadCalibration { kind, content } => {
                match validate_upload(&content, kind, &self.device.channels) {
                    Ok(upload) => {
                        info!(%kind, "Calibration file applied");
                        self.calibration.apply(upload);
                        vec![Effect::Ui(UiUpdate::Calibration {
                            kind,
                            factors: self.calibration.clone(),
                        })]
                    }
                    Err(err) => {
                        warn!(%kind, error = %err, "Calibration file rejected");
                        vec![Effect::Notify(Notification::warning("Unrecognized file format"))]
                    }
                }
            }
            UserIntent::ResetCalibration(kind) => self.ask(
                PendingAction::ResetCalibration(kind),
                "Reset?",
                "Are you sure to reset all the calibration factors to 1?",
            ),
            UserIntent::SaveCalibration { kind, filename } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                let filename = sanitize_filename(&filename);
                if filename.is_empty() {
                    return vec![Effect::Notify(Notification::warning("Insert a file name"))];
                }
                if self.catalog.contains(calibration_catalog(kind), &filename) {
                    return self.ask(
                        PendingAction::SaveCalibration { kind, filename },
                        "Overwrite?",
                        "A calibration file with the same name is already in memory. Proceed saving and overwrite the current file?",
                    );
                }
                self.save_calibration(kind, &filename)
            }

            UserIntent::DeleteBackground { name } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                self.ask(
                    PendingAction::DeleteBackground { name },
                    "Delete?",
                    "Are you sure to delete this background file?",
                )
            }
            UserIntent::DownloadBackground { name } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                self.ask(
                    PendingAction::DownloadBackground { name },
                    "Download?",
                    "Are you sure to download this background run?",
                )
            }

            UserIntent::SaveRun { notes } => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                vec![Effect::Transmit(Command::save_notes(
                    &notes,
                    &self.alarms.compile_errors(),
                ))]
            }
            UserIntent::DiscardRun => {
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                vec![Effect::Transmit(Command::discard_run())]
            }
            UserIntent::SaveBackground { name } => {
                let Some(old_name) = self.pending_background.clone() else {
                    return vec![Effect::Notify(Notification::warning(
                        "No background acquisition to save",
                    ))];
                };
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                let new_name = name.trim().to_string();
                if new_name.is_empty() {
                    return vec![Effect::Notify(Notification::warning("Insert a file name"))];
                }
                if self.catalog.contains(FileCatalogKind::Background, &new_name) {
                    return self.ask(
                        PendingAction::SaveBackground { old_name, new_name },
                        "Overwrite?",
                        "A background file with the same name is already in memory. Proceed saving and overwrite the current file?",
                    );
                }
                self.pending_background = None;
                vec![Effect::Transmit(Command::rename_background(&old_name, &new_name))]
            }
            UserIntent::DiscardBackground => {
                let Some(filename) = self.pending_background.clone() else {
                    return vec![Effect::Notify(Notification::warning(
                        "No background acquisition to discard",
                    ))];
                };
                if let Some(refused) = self.require_connection() {
                    return refused;
                }
                self.pending_background = None;
                vec![Effect::Transmit(Command::discard_background(&filename))]
            }
        }
    }

    fn run_selection_refusal(&self, kind: RunKind, names: &[String]) -> Option<Vec<Effect>> {
        if let Some(refused) = self.require_connection() {
            return Some(refused);
        }
        if names.is_empty() {
            return Some(vec![Effect::Notify(Notification::warning("No files selected"))]);
        }
        if kind == RunKind::Range {
            return Some(vec![Effect::Notify(Notification::warning(
                "Range runs can only be managed on the device",
            ))]);
        }
        None
    }

    pub(crate) fn save_calibration(&mut self, kind: CalibrationKind, filename: &str) -> Vec<Effect> {
        let record = CalibrationRecord::for_save(kind, filename, &self.calibration);
        match Command::save_calibration(kind, &record) {
            Ok(command) => vec![Effect::Transmit(command)],
            Err(err) => {
                error!(%kind, %filename, %err, "Calibration record could not be encoded");
                vec![Effect::Notify(Notification::error(format!(
                    "Calibration not saved: {err}"
                )))]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::effects::{notifications, transmitted};
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn connected() -> DeviceSession {
        let mut session = DeviceSession::new(&SessionConfig::default(), t(0));
        session.on_transport_opened(t(0));
        session.dispatch(r#"{"action":"connected","value":"{\"type\":0}"}"#, t(0));
        session.dispatch(r#"{"action":"fpga_hv","value":"1"}"#, t(0));
        session
    }

    #[test]
    fn requests_without_link_are_dropped() {
        let mut session = DeviceSession::new(&SessionConfig::default(), t(0));
        let effects = session.apply(UserIntent::ToggleAcquisition, t(1));
        assert_eq!(effects, vec![Effect::Notify(Notification::connection_error())]);
        assert_eq!(session.state().mode, AcquisitionMode::Idle);
    }

    #[test]
    fn reset_alarms_clears_log() {
        let mut session = connected();
        session.dispatch(r#"{"action":"trigger_error","value":"boom"}"#, t(1));
        assert!(session.state().control_unit.is_alarm());

        let effects = session.apply(UserIntent::ResetAlarms, t(2));
        assert_eq!(transmitted(&effects), vec!["reset_alarms"]);
        assert_eq!(session.state().control_unit, ControlUnitStatus::Ok);
        assert!(session.errors().is_empty());
    }

    #[test]
    fn reset_counters_depends_on_mode() {
        let mut session = connected();
        session.apply(UserIntent::ToggleStreaming, t(1));
        let effects = session.apply(UserIntent::ResetCounters, t(2));
        assert_eq!(effects[0].as_command().unwrap().wire_value().as_deref(), Some("restart"));

        session.apply(UserIntent::ToggleStreaming, t(3));
        session.apply(UserIntent::ToggleAcquisition, t(4));
        let effects = session.apply(UserIntent::ResetCounters, t(5));
        assert!(transmitted(&effects).is_empty());
    }

    #[test]
    fn unchanged_notes_are_not_sent() {
        let mut session = connected();
        let effects = session.apply(
            UserIntent::EditNotes {
                run: "r1".into(),
                old_notes: "same".into(),
                new_notes: "same".into(),
            },
            t(1),
        );
        assert_eq!(notifications(&effects), vec!["The notes have not been modified"]);
    }

    #[test]
    fn bad_calibration_upload_changes_nothing() {
        let mut session = connected();
        let before = session.calibration().clone();
        let effects = session.apply(
            UserIntent::UploadCalibration {
                kind: CalibrationKind::Range,
                content: "header\n1\t2\n".into(),
            },
            t(1),
        );
        assert_eq!(notifications(&effects), vec!["Unrecognized file format"]);
        assert_eq!(session.calibration(), &before);
    }

    #[test]
    fn run_scan_blocked_while_streaming() {
        let mut session = connected();
        session.apply(UserIntent::ToggleStreaming, t(1));
        let effects = session.apply(UserIntent::ScanRuns(RunKind::Integral), t(2));
        assert_eq!(notifications(&effects), vec![RUN_ONGOING]);

        let effects = session.apply(
            UserIntent::ScanCalibrations {
                kind: CalibrationKind::Range,
                hidden: true,
            },
            t(3),
        );
        assert_eq!(transmitted(&effects), vec!["log_scan_range_calib_files"]);
    }

    #[test]
    fn inspect_control_unit() {
        let mut session = connected();
        let effects = session.apply(UserIntent::InspectControlUnit, t(1));
        assert_eq!(notifications(&effects), vec!["Everything is fine!"]);
    }

    #[test]
    fn inspect_control_unit_needs_link() {
        let mut session = DeviceSession::new(&SessionConfig::default(), t(0));
        let effects = session.apply(UserIntent::InspectControlUnit, t(1));
        assert_eq!(effects, vec![Effect::Notify(Notification::connection_error())]);
    }

    #[test]
    fn sampling_mode_locked_during_run() {
        let mut session = connected();
        session.apply(UserIntent::ToggleAcquisition, t(1));
        let effects = session.apply(UserIntent::SelectSamplingMode("1".into()), t(2));
        assert_eq!(effects.len(), 1);
        assert_eq!(session.form().sampling_mode, "0");
    }
}
