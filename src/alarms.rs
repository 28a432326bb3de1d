//! Device error and warning aggregation.
//!
//! [`ErrorAggregator`] keeps the chronological error log shown to the operator,
//! collapses bursts of the same message, and escalates device errors into a
//! safe stop of whatever is running.

use crate::effects::{Effect, Notification};
use crate::protocol::Command;
use crate::state::{AcquisitionMode, ControlUnitStatus, SessionStateMachine};
use chrono::{DateTime, Duration, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Fault type code the device uses for warnings.
pub const WARNING_CODE: i64 = 99;

/// Code used for errors raised through `trigger_error`.
pub const TRIGGERED_ERROR_CODE: i64 = 1;

/// Timestamp format used in run notes.
const NOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Severity of a device-reported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Type code 99
    Warning,
    /// Any other type code
    Error(i64),
}

impl ErrorKind {
    /// Map an `update_error_list` type code.
    pub fn from_type_code(code: i64) -> Self {
        if code == WARNING_CODE {
            ErrorKind::Warning
        } else {
            ErrorKind::Error(code)
        }
    }

    /// Check if this is a warning.
    pub fn is_warning(&self) -> bool {
        matches!(self, ErrorKind::Warning)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Warning => write!(f, "WARNING"),
            ErrorKind::Error(_) => write!(f, "ERROR"),
        }
    }
}

/// One entry of the error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Warning or error
    pub kind: ErrorKind,
    /// Device text
    pub message: String,
    /// Local time of arrival
    pub occurred_at: DateTime<Local>,
}

impl ErrorRecord {
    /// One line of the run-notes error section.
    pub fn note_line(&self) -> String {
        format!(
            "{} {}: {}\n",
            self.occurred_at.format(NOTE_TIMESTAMP_FORMAT),
            self.kind,
            self.message
        )
    }
}

/// Indicator status for an escalated error. Codes that do not denote an
/// alarm (`0`, `99`) fall back to [`TRIGGERED_ERROR_CODE`].
fn alarm_status(code: i64) -> ControlUnitStatus {
    match ControlUnitStatus::from_code(code) {
        alarm @ ControlUnitStatus::Alarm(_) => alarm,
        ControlUnitStatus::Ok | ControlUnitStatus::Unknown => {
            ControlUnitStatus::Alarm(TRIGGERED_ERROR_CODE)
        }
    }
}

/// Append-only error log with burst suppression.
#[derive(Debug, Clone)]
pub struct ErrorAggregator {
    entries: Vec<ErrorRecord>,
    window: Duration,
}

impl ErrorAggregator {
    /// Create an aggregator that suppresses repeats within `window`.
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            entries: Vec::new(),
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(8)),
        }
    }

    /// Log entries, oldest first.
    pub fn entries(&self) -> &[ErrorRecord] {
        &self.entries
    }

    /// Check if nothing was recorded since the last reset.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear the log.
    pub fn reset(&mut self) {
        debug!(count = self.entries.len(), "Error log cleared");
        self.entries.clear();
    }

    /// Whether `message` repeats the last appended entry within the window.
    fn is_duplicate(&self, message: &str, now: DateTime<Local>) -> bool {
        self.entries.last().is_some_and(|last| {
            last.message == message && now.signed_duration_since(last.occurred_at) <= self.window
        })
    }

    /// Record a device-reported event.
    ///
    /// Returns the notification to show, or nothing when the record was
    /// suppressed as a duplicate. Suppressed records are not stored and do not
    /// extend the window.
    pub fn record(&mut self, kind: ErrorKind, message: &str, now: DateTime<Local>) -> Vec<Effect> {
        if self.is_duplicate(message, now) {
            debug!(%kind, %message, "Duplicate device event suppressed");
            return Vec::new();
        }
        warn!(%kind, %message, "Device reported");
        self.entries.push(ErrorRecord {
            kind,
            message: message.to_string(),
            occurred_at: now,
        });
        let notification = match kind {
            ErrorKind::Warning => Notification::warning(message),
            ErrorKind::Error(_) => Notification::error(message),
        };
        vec![Effect::Notify(notification)]
    }

    /// Error section for run notes: one line per entry.
    pub fn compile_errors(&self) -> String {
        self.entries.iter().map(ErrorRecord::note_line).collect()
    }

    /// Put the device into alarm and stop whatever is running.
    ///
    /// A foreground run gets its notes saved (with the full error log) before
    /// the stop command, so the recorded data carries the reason.
    pub fn escalate(
        &self,
        machine: &mut SessionStateMachine,
        code: i64,
        message: &str,
    ) -> Vec<Effect> {
        let prior = machine.mode();
        let mut effects = machine.set_control_unit(alarm_status(code));
        match prior {
            AcquisitionMode::Acquiring => {
                warn!(code, %message, "Run stopped by device error");
                effects.push(Effect::Transmit(Command::save_notes(
                    &format!("RUN STOPPED BY INTERNAL ERROR: {message}"),
                    &self.compile_errors(),
                )));
                effects.push(Effect::Transmit(Command::measure_stop()));
            }
            AcquisitionMode::Streaming
            | AcquisitionMode::BackgroundAcquiring
            | AcquisitionMode::DeviceSpecific => {
                warn!(code, %message, mode = %prior, "Acquisition stopped by device error");
                effects.push(Effect::Transmit(Command::measure_stop()));
            }
            AcquisitionMode::Idle => {}
        }
        effects.extend(machine.force_idle());
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::transmitted;
    use crate::settings::Settings;
    use crate::state::StartKind;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn aggregator() -> ErrorAggregator {
        ErrorAggregator::new(std::time::Duration::from_secs(8))
    }

    #[test]
    fn type_code_99_is_warning() {
        assert_eq!(ErrorKind::from_type_code(99), ErrorKind::Warning);
        assert_eq!(ErrorKind::from_type_code(4), ErrorKind::Error(4));
    }

    #[test]
    fn repeat_within_window_is_suppressed() {
        let mut alarms = aggregator();
        assert_eq!(alarms.record(ErrorKind::Warning, "fan", t(0)).len(), 1);
        assert!(alarms.record(ErrorKind::Warning, "fan", t(5)).is_empty());
        assert_eq!(alarms.entries().len(), 1);
    }

    #[test]
    fn repeat_after_window_is_appended() {
        let mut alarms = aggregator();
        alarms.record(ErrorKind::Warning, "fan", t(0));
        alarms.record(ErrorKind::Warning, "fan", t(9));
        assert_eq!(alarms.entries().len(), 2);
    }

    #[test]
    fn window_counts_from_last_appended_entry() {
        let mut alarms = aggregator();
        alarms.record(ErrorKind::Warning, "fan", t(0));
        alarms.record(ErrorKind::Warning, "fan", t(6));
        alarms.record(ErrorKind::Warning, "fan", t(9));
        assert_eq!(alarms.entries().len(), 2);
    }

    #[test]
    fn different_message_is_always_appended() {
        let mut alarms = aggregator();
        alarms.record(ErrorKind::Warning, "fan", t(0));
        alarms.record(ErrorKind::Error(3), "temp", t(1));
        alarms.record(ErrorKind::Warning, "fan", t(2));
        assert_eq!(alarms.entries().len(), 3);
    }

    #[test]
    fn escalation_during_run_saves_notes_before_stop() {
        let mut alarms = aggregator();
        let mut machine = SessionStateMachine::new(true);
        machine.set_control_unit(ControlUnitStatus::Ok);
        machine.start(StartKind::Acquisition, &Settings::background("ts".into(), true, true));

        alarms.record(ErrorKind::Error(5), "overcurrent", t(0));
        let effects = alarms.escalate(&mut machine, 5, "overcurrent");
        assert_eq!(transmitted(&effects), vec!["log_save_notes", "measure_stop"]);
        assert_eq!(machine.mode(), AcquisitionMode::Idle);
        assert_eq!(machine.control_unit(), ControlUnitStatus::Alarm(5));

        let notes = effects[1..]
            .iter()
            .find_map(Effect::as_command)
            .and_then(|command| command.payload.clone())
            .unwrap();
        assert_eq!(notes["notes"], "RUN STOPPED BY INTERNAL ERROR: overcurrent");
        assert!(notes["errors"]
            .as_str()
            .unwrap()
            .ends_with("ERROR: overcurrent\n"));
    }

    #[test]
    fn escalation_when_idle_only_sets_alarm() {
        let alarms = aggregator();
        let mut machine = SessionStateMachine::new(false);
        let effects = alarms.escalate(&mut machine, 2, "x");
        assert!(transmitted(&effects).is_empty());
        assert_eq!(machine.control_unit(), ControlUnitStatus::Alarm(2));
    }

    #[test]
    fn escalation_with_non_alarm_code_still_raises_alarm() {
        let alarms = aggregator();
        for code in [0, WARNING_CODE] {
            let mut machine = SessionStateMachine::new(false);
            machine.set_control_unit(ControlUnitStatus::Ok);
            alarms.escalate(&mut machine, code, "x");
            assert_eq!(
                machine.control_unit(),
                ControlUnitStatus::Alarm(TRIGGERED_ERROR_CODE)
            );
        }
    }
}
