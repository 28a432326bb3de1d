//! Inbound frame dispatch.

use super::DeviceSession;
use crate::alarms::ErrorKind;
use crate::effects::{Effect, UiUpdate};
use crate::error::SessionError;
use crate::protocol::{decode, InboundMessage};
use chrono::{DateTime, Local};
use tracing::{debug, trace, warn};

impl DeviceSession {
    /// Decode one raw frame and apply it.
    ///
    /// Frames that cannot be decoded are logged and dropped; they never change
    /// state.
    pub fn dispatch(&mut self, raw: &str, now: DateTime<Local>) -> Vec<Effect> {
        match decode(raw) {
            Ok((kind, message)) => {
                trace!(action = %kind, family = %kind.family(), "Dispatching");
                let effects = self.handle(message, now);
                self.gate(effects)
            }
            Err(SessionError::UnknownAction(action)) => {
                debug!(%action, "Ignoring unrecognized action");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "Discarding undecodable frame");
                Vec::new()
            }
        }
    }

    /// Apply an already decoded message.
    pub fn handle(&mut self, message: InboundMessage, now: DateTime<Local>) -> Vec<Effect> {
        match message {
            InboundMessage::Watchdog => {
                self.connection.refresh_liveness(&mut self.timers, now);
                Vec::new()
            }
            InboundMessage::Connected { control_unit } => {
                debug!(%control_unit, "Handshake completed");
                self.connection.mark_handshake();
                self.machine.set_control_unit(control_unit)
            }
            InboundMessage::AcquisitionEnded => self.machine.on_device_acquisition_ended(),
            InboundMessage::BackgroundCompleted { filename } => {
                let effects = self.machine.on_background_completed(&filename);
                self.pending_background = Some(filename);
                effects
            }
            InboundMessage::Plot(update) => vec![Effect::Ui(UiUpdate::Plot(update))],
            InboundMessage::CountersReset => vec![Effect::Ui(UiUpdate::ResetPlots)],
            InboundMessage::Hv(status) => self.machine.set_hv(status),
            InboundMessage::DeviceStatus(status) => self.machine.set_control_unit(status),
            InboundMessage::Memory(series) => vec![Effect::Ui(UiUpdate::Memory(series))],
            InboundMessage::SamplingModeOptions(options) => {
                vec![Effect::Ui(UiUpdate::SamplingModeOptions(options))]
            }
            InboundMessage::SamplingRateOptions(options) => {
                vec![Effect::Ui(UiUpdate::SamplingRateOptions(options))]
            }
            InboundMessage::DeviceError { kind, message } => {
                let mut effects = self.alarms.record(kind, &message, now);
                if let ErrorKind::Error(code) = kind {
                    effects.extend(self.alarms.escalate(&mut self.machine, code, &message));
                }
                effects
            }
            InboundMessage::ErrorList(list) => vec![Effect::Ui(UiUpdate::ErrorListText(list))],
            InboundMessage::DeviceMessage(text) => vec![Effect::Ui(UiUpdate::DeviceMessage(text))],
            InboundMessage::FileList {
                catalog,
                presentation,
                files,
            } => {
                debug!(%catalog, count = files.len(), "File list refreshed");
                self.catalog.replace_files(catalog, files.clone());
                vec![Effect::Ui(UiUpdate::FileList {
                    catalog,
                    presentation,
                    files,
                })]
            }
            InboundMessage::CalibrationLoaded { kind, record } => {
                self.calibration.apply_record(kind, &record);
                vec![Effect::Ui(UiUpdate::Calibration {
                    kind,
                    factors: self.calibration.clone(),
                })]
            }
            InboundMessage::RunList { kind, entries } => {
                self.catalog.replace_runs(kind, entries.clone());
                vec![Effect::Ui(UiUpdate::RunList { kind, entries })]
            }
            InboundMessage::Download { url } => vec![Effect::Ui(UiUpdate::Download { url })],
            InboundMessage::Acknowledged(ack) => vec![Effect::Notify(ack.notification())],
        }
    }
}
