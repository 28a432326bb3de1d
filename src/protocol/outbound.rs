//! Outbound command catalog.
//!
//! Control-unit commands (`measure_*`, `reset_*`, `updateConfig`, `delete_file`)
//! go on the default channel; file management goes to the logger.

use super::envelope::Command;
use crate::calibration::{CalibrationKind, CalibrationRecord};
use crate::catalog::RunKind;
use crate::error::AppResult;
use crate::settings::Settings;
use serde_json::{json, Value};

impl Command {
    /// Request the initial device configuration.
    pub fn update_config_init() -> Self {
        Command::control("updateConfig").with_payload("init")
    }

    /// Start a foreground DAQ run.
    pub fn measure_start(settings: &Settings) -> Self {
        Command::control("measure_start").with_payload(settings.to_payload())
    }

    /// Stop any running acquisition.
    pub fn measure_stop() -> Self {
        Command::control("measure_stop")
    }

    /// Start a background run.
    pub fn bkg_measure_start(settings: &Settings) -> Self {
        Command::control("bkg_measure_start").with_payload(settings.to_payload())
    }

    /// Start live streaming.
    pub fn start_data_stream(settings: &Settings) -> Self {
        Command::control("start_data_stream").with_payload(settings.to_payload())
    }

    /// Clear device alarms.
    pub fn reset_alarms() -> Self {
        Command::control("reset_alarms")
    }

    /// Reset the device counters; `restart` keeps a running stream going.
    pub fn reset_counters(restart: bool) -> Self {
        let command = Command::control("reset_counters");
        if restart {
            command.with_payload("restart")
        } else {
            command
        }
    }

    /// Drop the data of the run that just ended.
    pub fn discard_run() -> Self {
        Command::control("delete_file").with_payload(json!({ "file_list": Value::Array(Vec::new()) }))
    }

    /// Attach notes (and the error log) to the run that just ended.
    pub fn save_notes(notes: &str, errors: &str) -> Self {
        Command::logger("log_save_notes").with_payload(json!({
            "notes": notes,
            "errors": errors,
        }))
    }

    /// List stored runs of one family.
    pub fn scan_runs(kind: RunKind) -> Self {
        Command::logger(format!("log_scan_{}_files", kind.wire_name()))
    }

    /// List calibration files; `hidden` refreshes the cache without opening
    /// the listing.
    pub fn scan_calibrations(kind: CalibrationKind, hidden: bool) -> Self {
        let command = Command::logger(format!("log_scan_{}_calib_files", calibration_infix(kind)));
        if hidden {
            command.with_payload("hidden")
        } else {
            command
        }
    }

    /// List stored background files.
    pub fn scan_backgrounds() -> Self {
        Command::logger("log_scan_background_files")
    }

    /// Replace the notes of a stored run.
    pub fn edit_notes(run: &str, old_notes: &str, new_notes: &str) -> Self {
        Command::logger("log_edit_notes").with_payload(json!({
            "notes_filename": run,
            "old_notes": old_notes,
            "new_notes": new_notes,
        }))
    }

    /// Load a stored integral run for display.
    pub fn load_int_file(run: &str, use_calib: bool, calib_file: &str) -> Self {
        Command::logger("log_load_int_file").with_payload(json!({
            "data_filename": run,
            "use_calib": use_calib,
            "calib_file": calib_file,
        }))
    }

    /// Download stored runs. Only position and integral runs are exported.
    pub fn download_runs(kind: RunKind, names: &[String], address: &str) -> Option<Self> {
        run_file_infix(kind).map(|infix| {
            Command::logger(format!("download_{infix}_files")).with_payload(json!({
                "file_list": names,
                "include": "false",
                "IP_addr": address,
            }))
        })
    }

    /// Delete stored runs. Only position and integral runs can be deleted.
    pub fn delete_runs(kind: RunKind, names: &[String]) -> Option<Self> {
        run_file_infix(kind).map(|infix| {
            Command::logger(format!("delete_{infix}_files"))
                .with_payload(json!({ "file_list": names }))
        })
    }

    /// Read a stored calibration file.
    pub fn load_calibration_file(kind: CalibrationKind, name: &str) -> Self {
        Command::logger(format!("log_load_{}_calib_file", calibration_infix(kind)))
            .with_payload(name)
    }

    /// Delete a stored calibration file.
    pub fn delete_calibration_file(kind: CalibrationKind, name: &str) -> Self {
        Command::logger(format!("log_delete_{}_calib_file", calibration_infix(kind)))
            .with_payload(name)
    }

    /// Store calibration factors under the record's file name.
    pub fn save_calibration(kind: CalibrationKind, record: &CalibrationRecord) -> AppResult<Self> {
        let payload = serde_json::to_value(record)?;
        Ok(
            Command::logger(format!("log_save_{}_calibration", calibration_infix(kind)))
                .with_payload(payload),
        )
    }

    /// Delete a stored background file from the logbook listing.
    pub fn delete_background(name: &str) -> Self {
        Command::logger("log_delete_background").with_payload(name)
    }

    /// Discard the background file just recorded.
    pub fn discard_background(filename: &str) -> Self {
        Command::logger("log_delete_background").with_payload(json!({ "filename": filename }))
    }

    /// Keep the background file just recorded under a new name.
    pub fn rename_background(old_name: &str, new_name: &str) -> Self {
        Command::logger("log_rename_background").with_payload(json!({
            "old_name": old_name,
            "new_name": new_name,
        }))
    }

    /// Package a stored background file for download from `address`.
    pub fn download_background(name: &str, address: &str) -> Self {
        Command::logger("log_download_background").with_payload(json!({
            "file_list": [name],
            "include": "false",
            "IP_addr": address,
        }))
    }
}

fn calibration_infix(kind: CalibrationKind) -> &'static str {
    match kind {
        CalibrationKind::Position => "profile",
        CalibrationKind::Range => "range",
    }
}

fn run_file_infix(kind: RunKind) -> Option<&'static str> {
    match kind {
        RunKind::Position => Some("profile"),
        RunKind::Integral => Some("int"),
        RunKind::Range => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationFactors;
    use crate::protocol::Channel;

    #[test]
    fn scan_commands_use_logger_channel() {
        let command = Command::scan_runs(RunKind::Integral);
        assert_eq!(command.name, "log_scan_int_files");
        assert_eq!(command.channel, Channel::Logger);

        let command = Command::scan_calibrations(CalibrationKind::Range, true);
        assert_eq!(command.name, "log_scan_range_calib_files");
        assert_eq!(command.wire_value().as_deref(), Some("hidden"));
    }

    #[test]
    fn reset_counters_restart_modifier() {
        assert_eq!(Command::reset_counters(false).payload, None);
        assert_eq!(
            Command::reset_counters(true).wire_value().as_deref(),
            Some("restart")
        );
    }

    #[test]
    fn discard_run_sends_empty_file_list() {
        let command = Command::discard_run();
        assert_eq!(command.name, "delete_file");
        assert_eq!(command.channel, Channel::Control);
        assert_eq!(command.wire_value().as_deref(), Some(r#"{"file_list":[]}"#));
    }

    #[test]
    fn save_calibration_carries_record() {
        let factors = CalibrationFactors {
            x: Vec::new(),
            y: Vec::new(),
            int: Vec::new(),
            z: vec![1.0, 0.5],
        };
        let record = CalibrationRecord::for_save(CalibrationKind::Range, "cal_z", &factors);
        let command = Command::save_calibration(CalibrationKind::Range, &record).unwrap();
        assert_eq!(command.name, "log_save_range_calibration");
        let payload = command.payload.unwrap();
        assert_eq!(payload["filename_Z"], "cal_z");
        assert_eq!(payload["Z_calib"][1], 0.5);
    }

    #[test]
    fn range_runs_have_no_download() {
        assert!(Command::download_runs(RunKind::Range, &[], "10.0.0.1").is_none());
        let command = Command::download_runs(RunKind::Position, &["r1".into()], "10.0.0.1").unwrap();
        assert_eq!(command.name, "download_profile_files");
        assert_eq!(command.payload.unwrap()["IP_addr"], "10.0.0.1");
    }
}
