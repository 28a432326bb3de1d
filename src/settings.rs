//! Acquisition settings.
//!
//! [`SettingsForm`] holds what the operator currently selected. Right before a
//! start command the form is frozen into a [`Settings`] snapshot carrying a fresh
//! run timestamp. The device expects every field as a string, flags included.

use crate::calibration::CalibrationKind;
use crate::config::DeviceConfig;
use crate::effects::Notification;
use crate::state::AcquisitionMode;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Sampling mode in which the sampling rate is chosen by the operator.
pub const MANUAL_SAMPLING_MODE: &str = "0";

/// Format of the run timestamp sent with every start command.
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const BACKGROUND_SAMPLING_RATE: &str = "100";
const BACKGROUND_FIRST_CHANNEL: &str = "1";
const DEFAULT_SAMPLING_RATE: &str = "100";
const DEFAULT_FIRST_CHANNEL: &str = "1";

const RUN_ONGOING: &str = "Data streaming or DAQ ongoing. Stop before!";

/// Frozen acquisition configuration sent with `measure_start`,
/// `start_data_stream` and `bkg_measure_start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Sampling rate, ignored outside manual mode
    pub sampling_rate: String,
    /// Sampling mode code
    pub sampling_mode: String,
    /// First integral channel
    pub first_channel: String,
    /// Apply the position calibration
    pub use_pos_calib: bool,
    /// Position calibration file
    pub pos_calib_filename: String,
    /// Apply the range calibration
    pub use_rng_calib: bool,
    /// Range calibration file
    pub rng_calib_filename: String,
    /// Subtract the background
    pub use_bkg: bool,
    /// Background file
    pub bkg_filename: String,
    /// Run the range module
    pub enable_range: bool,
    /// Run the profile module
    pub enable_profiles: bool,
    /// Run timestamp
    pub datetime: String,
}

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl Settings {
    /// Fixed configuration used for background runs.
    ///
    /// Only the modules the device is fitted with are enabled.
    pub fn background(datetime: String, has_rng: bool, has_pos: bool) -> Self {
        Self {
            sampling_rate: BACKGROUND_SAMPLING_RATE.to_string(),
            sampling_mode: MANUAL_SAMPLING_MODE.to_string(),
            first_channel: BACKGROUND_FIRST_CHANNEL.to_string(),
            use_pos_calib: false,
            pos_calib_filename: String::new(),
            use_rng_calib: false,
            rng_calib_filename: String::new(),
            use_bkg: false,
            bkg_filename: String::new(),
            enable_range: has_rng,
            enable_profiles: has_pos,
            datetime,
        }
    }

    /// Wire payload: every field as a string.
    pub fn to_payload(&self) -> Value {
        json!({
            "sampling_rate": self.sampling_rate,
            "sampling_mode": self.sampling_mode,
            "first_channel": self.first_channel,
            "use_pos_calib": flag(self.use_pos_calib),
            "pos_calib_filename": self.pos_calib_filename,
            "use_rng_calib": flag(self.use_rng_calib),
            "rng_calib_filename": self.rng_calib_filename,
            "use_bkg": flag(self.use_bkg),
            "bkg_filename": self.bkg_filename,
            "enable_range": flag(self.enable_range),
            "enable_profiles": flag(self.enable_profiles),
            "datetime": self.datetime,
        })
    }
}

/// Format a run timestamp.
pub fn run_timestamp(now: DateTime<Local>) -> String {
    now.format(RUN_TIMESTAMP_FORMAT).to_string()
}

/// Operator-facing on/off switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Switch {
    /// Apply the selected position calibration
    PositionCalibration,
    /// Apply the selected range calibration
    RangeCalibration,
    /// Subtract the selected background
    BackgroundSubtraction,
    /// Run the profile module
    ProfilesModule,
    /// Run the range module
    RangeModule,
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::PositionCalibration => write!(f, "position-calibration"),
            Switch::RangeCalibration => write!(f, "range-calibration"),
            Switch::BackgroundSubtraction => write!(f, "background-subtraction"),
            Switch::ProfilesModule => write!(f, "profiles-module"),
            Switch::RangeModule => write!(f, "range-module"),
        }
    }
}

/// A selectable file plus the switch that applies it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSelection {
    /// Selected file
    pub file: Option<String>,
    /// Switch position
    pub apply: bool,
}

impl FileSelection {
    fn filename(&self) -> String {
        self.file.clone().unwrap_or_default()
    }
}

/// Current acquisition choices of the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsForm {
    /// Sampling mode code
    pub sampling_mode: String,
    /// Sampling rate
    pub sampling_rate: String,
    /// First integral channel
    pub first_channel: String,
    /// Position calibration choice
    pub position_calibration: FileSelection,
    /// Range calibration choice
    pub range_calibration: FileSelection,
    /// Background subtraction choice
    pub background: FileSelection,
    /// Profile module switch
    pub enable_profiles: bool,
    /// Range module switch
    pub enable_range: bool,
    has_pos: bool,
    has_rng: bool,
    module_switches: bool,
}

impl SettingsForm {
    /// Defaults for `device`, with module switches matching its modules.
    pub fn new(device: &DeviceConfig) -> Self {
        Self {
            sampling_mode: MANUAL_SAMPLING_MODE.to_string(),
            sampling_rate: DEFAULT_SAMPLING_RATE.to_string(),
            first_channel: DEFAULT_FIRST_CHANNEL.to_string(),
            position_calibration: FileSelection::default(),
            range_calibration: FileSelection::default(),
            background: FileSelection::default(),
            enable_profiles: device.has_pos,
            enable_range: device.has_rng,
            has_pos: device.has_pos,
            has_rng: device.has_rng,
            module_switches: device.has_module_switches(),
        }
    }

    /// The sampling-rate control is only meaningful in manual sampling mode.
    pub fn sampling_rate_enabled(&self) -> bool {
        self.sampling_mode == MANUAL_SAMPLING_MODE
    }

    /// Check if the module switches can be used.
    pub fn has_module_switches(&self) -> bool {
        self.module_switches
    }

    /// Freeze the form for a foreground start.
    pub fn snapshot(&self, now: DateTime<Local>) -> Settings {
        Settings {
            sampling_rate: self.sampling_rate.clone(),
            sampling_mode: self.sampling_mode.clone(),
            first_channel: self.first_channel.clone(),
            use_pos_calib: self.position_calibration.apply,
            pos_calib_filename: self.position_calibration.filename(),
            use_rng_calib: self.range_calibration.apply,
            rng_calib_filename: self.range_calibration.filename(),
            use_bkg: self.background.apply,
            bkg_filename: self.background.filename(),
            enable_range: self.enable_range,
            enable_profiles: self.enable_profiles,
            datetime: run_timestamp(now),
        }
    }

    /// Background runs ignore the form apart from the timestamp. Module flags
    /// follow the fitted modules, not the operator's switches.
    pub fn background_snapshot(&self, now: DateTime<Local>) -> Settings {
        Settings::background(run_timestamp(now), self.has_rng, self.has_pos)
    }

    /// Sampling parameters can only change while idle.
    pub fn check_editable(&self, mode: AcquisitionMode) -> Result<(), Notification> {
        if mode.is_idle() {
            Ok(())
        } else {
            Err(Notification::warning(RUN_ONGOING))
        }
    }

    /// Calibration choice of one kind.
    pub fn calibration(&self, kind: CalibrationKind) -> &FileSelection {
        match kind {
            CalibrationKind::Position => &self.position_calibration,
            CalibrationKind::Range => &self.range_calibration,
        }
    }

    fn calibration_mut(&mut self, kind: CalibrationKind) -> &mut FileSelection {
        match kind {
            CalibrationKind::Position => &mut self.position_calibration,
            CalibrationKind::Range => &mut self.range_calibration,
        }
    }

    /// Select the calibration file for `kind`. Clearing the selection also turns
    /// its switch off.
    pub fn select_calibration_file(&mut self, kind: CalibrationKind, file: Option<String>) {
        let selection = self.calibration_mut(kind);
        if file.is_none() {
            selection.apply = false;
        }
        selection.file = file;
    }

    /// Select the background file. Clearing it turns subtraction off.
    pub fn select_background_file(&mut self, file: Option<String>) {
        if file.is_none() {
            self.background.apply = false;
        }
        self.background.file = file;
    }

    /// Current position of a switch.
    pub fn switch(&self, switch: Switch) -> bool {
        match switch {
            Switch::PositionCalibration => self.position_calibration.apply,
            Switch::RangeCalibration => self.range_calibration.apply,
            Switch::BackgroundSubtraction => self.background.apply,
            Switch::ProfilesModule => self.enable_profiles,
            Switch::RangeModule => self.enable_range,
        }
    }

    /// Flip a switch, enforcing the rules for the current acquisition mode.
    ///
    /// On refusal the form is unchanged and the notification explains why.
    pub fn set_switch(
        &mut self,
        switch: Switch,
        on: bool,
        mode: AcquisitionMode,
    ) -> Result<(), Notification> {
        match switch {
            Switch::PositionCalibration | Switch::RangeCalibration => {
                if mode.is_foreground() {
                    return Err(Notification::warning(RUN_ONGOING));
                }
                let kind = if switch == Switch::PositionCalibration {
                    CalibrationKind::Position
                } else {
                    CalibrationKind::Range
                };
                let selection = self.calibration_mut(kind);
                if on && selection.file.is_none() {
                    return Err(Notification::warning("No calibration file selected"));
                }
                selection.apply = on;
            }
            Switch::BackgroundSubtraction => {
                if !mode.is_idle() {
                    return Err(Notification::warning(RUN_ONGOING));
                }
                if on && self.background.file.is_none() {
                    return Err(Notification::warning("No background source selected"));
                }
                self.background.apply = on;
            }
            Switch::ProfilesModule | Switch::RangeModule => {
                if !self.module_switches {
                    return Err(Notification::warning(
                        "Module selection requires both position and range modules",
                    ));
                }
                if mode.is_foreground() {
                    return Err(Notification::warning(RUN_ONGOING));
                }
                if switch == Switch::ProfilesModule {
                    self.enable_profiles = on;
                } else {
                    self.enable_range = on;
                }
            }
        }
        Ok(())
    }
}
