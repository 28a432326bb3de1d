//! Pending yes/no questions.
//!
//! A confirmation is asked by emitting [`Effect::Confirm`] and parking the
//! action under its [`ConfirmId`]. The answer comes back through
//! [`DeviceSession::resolve_confirmation`]. Accepting re-checks the action
//! against the state at answer time, since the device may have moved on while
//! the question was open.

use super::DeviceSession;
use crate::calibration::CalibrationKind;
use crate::catalog::RunKind;
use crate::effects::{ConfirmId, ConfirmRequest, Effect, Notification, UiUpdate};
use crate::protocol::Command;
use crate::state::{StartKind, Transition};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// An action parked until the operator answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    /// Start with the HV module off.
    Start(StartKind),
    /// Delete stored runs.
    DeleteRuns {
        /// Run family
        kind: RunKind,
        /// Run names
        names: Vec<String>,
    },
    /// Download stored runs.
    DownloadRuns {
        /// Run family
        kind: RunKind,
        /// Run names
        names: Vec<String>,
    },
    /// Delete a stored calibration file.
    DeleteCalibrationFile {
        /// Position or range
        kind: CalibrationKind,
        /// Stored file name
        name: String,
    },
    /// Reset factors of one kind to 1.
    ResetCalibration(CalibrationKind),
    /// Save over an existing calibration file.
    SaveCalibration {
        /// Position or range
        kind: CalibrationKind,
        /// Existing file name
        filename: String,
    },
    /// Delete a stored background file.
    DeleteBackground {
        /// Stored file name
        name: String,
    },
    /// Download a stored background file.
    DownloadBackground {
        /// Stored file name
        name: String,
    },
    /// Keep the recorded background under a name that is already listed.
    SaveBackground {
        /// Name given by the device
        old_name: String,
        /// Name chosen by the operator
        new_name: String,
    },
}

impl PendingAction {
    /// What the operator sees after answering "no".
    pub fn decline_notification(&self) -> Notification {
        match self {
            PendingAction::Start(_) | PendingAction::ResetCalibration(_) => {
                Notification::info("Aborted")
            }
            PendingAction::SaveCalibration { .. } => Notification::error("Change file name"),
            PendingAction::SaveBackground { .. } => Notification::info("Change file name"),
            _ => Notification::info("Cancelled"),
        }
    }
}

/// Questions awaiting an answer.
#[derive(Default)]
pub struct Confirmations {
    next_id: u64,
    pending: HashMap<ConfirmId, PendingAction>,
}

impl fmt::Debug for Confirmations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Confirmations")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Confirmations {
    /// Park `action` and return the id to ask with.
    pub fn open(&mut self, action: PendingAction) -> ConfirmId {
        self.next_id += 1;
        let id = ConfirmId(self.next_id);
        self.pending.insert(id, action);
        id
    }

    /// Remove and return the action parked under `id`.
    pub fn take(&mut self, id: ConfirmId) -> Option<PendingAction> {
        self.pending.remove(&id)
    }

    /// Number of open questions.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no question is open.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Forget every open question. Later answers to them are ignored.
    pub fn clear(&mut self) {
        if !self.pending.is_empty() {
            debug!(count = self.pending.len(), "Open confirmations dropped");
        }
        self.pending.clear();
    }
}

impl DeviceSession {
    pub(crate) fn ask(&mut self, action: PendingAction, title: &str, message: &str) -> Vec<Effect> {
        let id = self.confirmations.open(action);
        debug!(%id, %title, "Asking for confirmation");
        vec![Effect::Confirm(ConfirmRequest {
            id,
            title: title.to_string(),
            message: message.to_string(),
        })]
    }

    /// Feed back the operator's answer to a confirmation.
    ///
    /// Unknown or already answered ids are ignored.
    pub fn resolve_confirmation(
        &mut self,
        id: ConfirmId,
        accepted: bool,
        now: DateTime<Local>,
    ) -> Vec<Effect> {
        let Some(action) = self.confirmations.take(id) else {
            warn!(%id, "Answer for unknown confirmation ignored");
            return Vec::new();
        };
        if !accepted {
            info!(%id, ?action, "Operator declined");
            return vec![Effect::Notify(action.decline_notification())];
        }
        let effects = self.accept(action, now);
        self.gate(effects)
    }

    fn accept(&mut self, action: PendingAction, now: DateTime<Local>) -> Vec<Effect> {
        match action {
            PendingAction::Start(kind) => match self.machine.plan(kind) {
                Transition::Start | Transition::ConfirmStart => self.start(kind, now),
                Transition::Reject(notification) => vec![Effect::Notify(notification)],
                Transition::Stop => {
                    debug!(?kind, "Already running, confirmation has nothing to start");
                    Vec::new()
                }
            },
            PendingAction::DeleteRuns { kind, names } => Command::delete_runs(kind, &names)
                .map(Effect::Transmit)
                .into_iter()
                .collect(),
            PendingAction::DownloadRuns { kind, names } => {
                match Command::download_runs(kind, &names, &self.device.address) {
                    Some(command) => vec![
                        Effect::Notify(Notification::info("Preparing download, please wait...")),
                        Effect::Transmit(command),
                    ],
                    None => Vec::new(),
                }
            }
            PendingAction::DeleteCalibrationFile { kind, name } => {
                vec![Effect::Transmit(Command::delete_calibration_file(kind, &name))]
            }
            PendingAction::ResetCalibration(kind) => {
                info!(%kind, "Calibration factors reset");
                self.calibration.reset(kind);
                vec![Effect::Ui(UiUpdate::Calibration {
                    kind,
                    factors: self.calibration.clone(),
                })]
            }
            PendingAction::SaveCalibration { kind, filename } => {
                self.save_calibration(kind, &filename)
            }
            PendingAction::DeleteBackground { name } => {
                vec![Effect::Transmit(Command::delete_background(&name))]
            }
            PendingAction::DownloadBackground { name } => vec![
                Effect::Notify(Notification::info("Preparing download, please wait...")),
                Effect::Transmit(Command::download_background(&name, &self.device.address)),
            ],
            PendingAction::SaveBackground { old_name, new_name } => {
                if self.pending_background.as_deref() != Some(old_name.as_str()) {
                    return vec![Effect::Notify(Notification::warning(
                        "No background acquisition to save",
                    ))];
                }
                self.pending_background = None;
                vec![Effect::Transmit(Command::rename_background(&old_name, &new_name))]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::effects::{notifications, transmitted};
    use crate::session::UserIntent;
    use crate::state::{AcquisitionMode, ControlUnitStatus};
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn hv_off_session() -> DeviceSession {
        let mut session = DeviceSession::new(&SessionConfig::default(), t(0));
        session.on_transport_opened(t(0));
        session.dispatch(r#"{"action":"connected","value":"{\"type\":0}"}"#, t(0));
        session.dispatch(r#"{"action":"fpga_hv","value":"0"}"#, t(0));
        session
    }

    fn confirm_id(effects: &[Effect]) -> ConfirmId {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Confirm(request) => Some(request.id),
                _ => None,
            })
            .expect("confirmation requested")
    }

    #[test]
    fn link_loss_drops_open_questions() {
        let mut session = hv_off_session();
        let effects = session.apply(UserIntent::ToggleAcquisition, t(1));
        let id = confirm_id(&effects);
        assert_eq!(session.snapshot(t(1)).pending_confirmations, 1);

        session.on_transport_closed("reset by peer");
        assert_eq!(session.snapshot(t(2)).pending_confirmations, 0);

        session.on_transport_opened(t(3));
        session.dispatch(r#"{"action":"connected","value":"{\"type\":0}"}"#, t(3));
        assert!(session.resolve_confirmation(id, true, t(4)).is_empty());
        assert_eq!(session.state().mode, AcquisitionMode::Idle);
    }

    #[test]
    fn hv_off_start_waits_for_answer() {
        let mut session = hv_off_session();
        let effects = session.apply(UserIntent::ToggleAcquisition, t(1));
        assert!(transmitted(&effects).is_empty());
        let id = confirm_id(&effects);

        let effects = session.resolve_confirmation(id, true, t(2));
        assert_eq!(transmitted(&effects), vec!["measure_start"]);
        assert_eq!(session.state().mode, AcquisitionMode::Acquiring);
    }

    #[test]
    fn declined_start_is_abandoned() {
        let mut session = hv_off_session();
        let id = confirm_id(&session.apply(UserIntent::ToggleStreaming, t(1)));
        let effects = session.resolve_confirmation(id, false, t(2));
        assert_eq!(notifications(&effects), vec!["Aborted"]);
        assert_eq!(session.state().mode, AcquisitionMode::Idle);
    }

    #[test]
    fn accepted_start_rechecks_alarm() {
        let mut session = hv_off_session();
        let id = confirm_id(&session.apply(UserIntent::ToggleAcquisition, t(1)));
        session.dispatch(r#"{"action":"device_status","value":"{\"type\":5}"}"#, t(2));
        assert_eq!(session.state().control_unit, ControlUnitStatus::Alarm(5));

        let effects = session.resolve_confirmation(id, true, t(3));
        assert!(transmitted(&effects).is_empty());
        assert_eq!(session.state().mode, AcquisitionMode::Idle);
    }

    #[test]
    fn answers_are_single_use() {
        let mut session = hv_off_session();
        let id = confirm_id(&session.apply(UserIntent::ToggleAcquisition, t(1)));
        session.resolve_confirmation(id, false, t(2));
        assert!(session.resolve_confirmation(id, true, t(3)).is_empty());
    }

    #[test]
    fn reset_calibration_after_accept() {
        let mut session = hv_off_session();
        session.dispatch(
            r#"{"action":"load_range_calib","value":"{\"filename_Z\":\"z1\",\"Z_calib\":[2.0,3.0]}"}"#,
            t(1),
        );
        assert_eq!(session.calibration().z[0], 2.0);

        let id = confirm_id(&session.apply(UserIntent::ResetCalibration(CalibrationKind::Range), t(2)));
        session.resolve_confirmation(id, true, t(3));
        assert!(session.calibration().z.iter().all(|factor| *factor == 1.0));
    }

    #[test]
    fn download_runs_uses_device_address() {
        let mut session = hv_off_session();
        let id = confirm_id(&session.apply(
            UserIntent::DownloadRuns {
                kind: RunKind::Integral,
                names: vec!["r1".into(), "r2".into()],
            },
            t(1),
        ));
        let effects = session.resolve_confirmation(id, true, t(2));
        assert_eq!(notifications(&effects), vec!["Preparing download, please wait..."]);
        let command = effects[1].as_command().unwrap();
        assert_eq!(command.name, "download_int_files");
        assert_eq!(
            command.payload.as_ref().unwrap()["IP_addr"],
            session.device().address.as_str()
        );
    }
}
