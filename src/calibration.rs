//! Calibration factors and calibration-file validation.
//!
//! Calibration files are tab-separated text with one header line and one line
//! per channel:
//!
//! - **range**: `z + 1` lines, factor in column 2
//! - **position**: `x + 1` lines (with `x == y`), X factor in column 2, Y in
//!   column 3 and, for the first integral channels only, INT in column 4
//!
//! Blank lines are ignored. A file that does not match the configured channel
//! geometry is rejected as a whole; nothing is applied.

use crate::config::ChannelGeometry;
use crate::error::{AppResult, SessionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which module a calibration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CalibrationKind {
    /// Position (profile) module, X/Y plus integral channels
    Position,
    /// Range module, Z channels
    Range,
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationKind::Position => write!(f, "position"),
            CalibrationKind::Range => write!(f, "range"),
        }
    }
}

impl FromStr for CalibrationKind {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "position" | "pos" | "profile" => Ok(CalibrationKind::Position),
            "range" | "rng" => Ok(CalibrationKind::Range),
            other => Err(SessionError::Configuration(format!(
                "Unknown calibration kind '{other}'. Must be one of: position, range"
            ))),
        }
    }
}

/// Per-channel multiplicative factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFactors {
    /// X strip factors
    pub x: Vec<f64>,
    /// Y strip factors
    pub y: Vec<f64>,
    /// Integral channel factors
    pub int: Vec<f64>,
    /// Z channel factors
    pub z: Vec<f64>,
}

impl CalibrationFactors {
    /// All factors set to 1 for the given geometry.
    pub fn unity(geometry: &ChannelGeometry) -> Self {
        Self {
            x: vec![1.0; geometry.x],
            y: vec![1.0; geometry.y],
            int: vec![1.0; geometry.int],
            z: vec![1.0; geometry.z],
        }
    }

    /// Reset the factors of one module to 1.
    pub fn reset(&mut self, kind: CalibrationKind) {
        match kind {
            CalibrationKind::Position => {
                self.x.iter_mut().for_each(|f| *f = 1.0);
                self.y.iter_mut().for_each(|f| *f = 1.0);
                self.int.iter_mut().for_each(|f| *f = 1.0);
            }
            CalibrationKind::Range => self.z.iter_mut().for_each(|f| *f = 1.0),
        }
    }

    /// Replace the factors of the module an upload belongs to.
    pub fn apply(&mut self, upload: CalibrationUpload) {
        match upload {
            CalibrationUpload::Position { x, y, int } => {
                self.x = x;
                self.y = y;
                self.int = int;
            }
            CalibrationUpload::Range { z } => self.z = z,
        }
    }

    /// Apply factors read back from a stored calibration record. Integral
    /// factors beyond the configured channel count are dropped; missing ones
    /// stay unchanged.
    pub fn apply_record(&mut self, kind: CalibrationKind, record: &CalibrationRecord) {
        fn overlay(target: &mut [f64], source: &[f64]) {
            for (dst, src) in target.iter_mut().zip(source) {
                *dst = *src;
            }
        }
        match kind {
            CalibrationKind::Position => {
                overlay(&mut self.x, &record.x_calib);
                overlay(&mut self.y, &record.y_calib);
                overlay(&mut self.int, &record.int_calib);
            }
            CalibrationKind::Range => overlay(&mut self.z, &record.z_calib),
        }
    }
}

/// Validated contents of an uploaded calibration file.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationUpload {
    /// Position module factors
    Position {
        /// X strip factors
        x: Vec<f64>,
        /// Y strip factors
        y: Vec<f64>,
        /// Integral channel factors
        int: Vec<f64>,
    },
    /// Range module factors
    Range {
        /// Z channel factors
        z: Vec<f64>,
    },
}

impl CalibrationUpload {
    /// Module the upload applies to.
    pub fn kind(&self) -> CalibrationKind {
        match self {
            CalibrationUpload::Position { .. } => CalibrationKind::Position,
            CalibrationUpload::Range { .. } => CalibrationKind::Range,
        }
    }
}

/// Calibration file as stored by the device logger.
///
/// Used both for `log_save_*_calibration` and for `load_*_calib` replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// Position calibration file name
    #[serde(default)]
    pub filename: String,
    /// X strip factors
    #[serde(default, rename = "X_calib")]
    pub x_calib: Vec<f64>,
    /// Y strip factors
    #[serde(default, rename = "Y_calib")]
    pub y_calib: Vec<f64>,
    /// Integral channel factors
    #[serde(default, rename = "INT_calib")]
    pub int_calib: Vec<f64>,
    /// Range calibration file name
    #[serde(default, rename = "filename_Z")]
    pub filename_z: String,
    /// Z channel factors
    #[serde(default, rename = "Z_calib")]
    pub z_calib: Vec<f64>,
}

impl CalibrationRecord {
    /// Record for saving the current factors of one module under `filename`.
    pub fn for_save(kind: CalibrationKind, filename: &str, factors: &CalibrationFactors) -> Self {
        match kind {
            CalibrationKind::Position => Self {
                filename: filename.to_string(),
                x_calib: factors.x.clone(),
                y_calib: factors.y.clone(),
                int_calib: factors.int.clone(),
                ..Default::default()
            },
            CalibrationKind::Range => Self {
                filename_z: filename.to_string(),
                z_calib: factors.z.clone(),
                ..Default::default()
            },
        }
    }
}

/// Device file names cannot contain spaces.
pub fn sanitize_filename(name: &str) -> String {
    name.trim().replace(' ', "_")
}

fn parse_factor(line_no: usize, columns: &[&str], column: usize) -> AppResult<f64> {
    let raw = columns.get(column - 1).ok_or_else(|| SessionError::CalibrationValue {
        line: line_no,
        reason: format!("missing column {column}"),
    })?;
    let value: f64 = raw.trim().parse().map_err(|_| SessionError::CalibrationValue {
        line: line_no,
        reason: format!("'{}' is not a number", raw.trim()),
    })?;
    if !value.is_finite() {
        return Err(SessionError::CalibrationValue {
            line: line_no,
            reason: format!("'{}' is not finite", raw.trim()),
        });
    }
    Ok(value)
}

/// Validate the text of a calibration file against the channel geometry.
pub fn validate_upload(
    content: &str,
    kind: CalibrationKind,
    geometry: &ChannelGeometry,
) -> AppResult<CalibrationUpload> {
    let lines: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    match kind {
        CalibrationKind::Range => {
            let expected = geometry.z + 1;
            if lines.len() != expected {
                return Err(SessionError::CalibrationFormat {
                    expected,
                    found: lines.len(),
                });
            }
            let z = lines
                .iter()
                .enumerate()
                .skip(1)
                .map(|(idx, line)| {
                    let columns: Vec<&str> = line.split('\t').collect();
                    parse_factor(idx + 1, &columns, 2)
                })
                .collect::<AppResult<Vec<f64>>>()?;
            Ok(CalibrationUpload::Range { z })
        }
        CalibrationKind::Position => {
            let expected = geometry.x + 1;
            if geometry.x != geometry.y || lines.len() != expected {
                return Err(SessionError::CalibrationFormat {
                    expected,
                    found: lines.len(),
                });
            }
            let mut x = Vec::with_capacity(geometry.x);
            let mut y = Vec::with_capacity(geometry.y);
            let mut int = Vec::with_capacity(geometry.int);
            for (idx, line) in lines.iter().enumerate().skip(1) {
                let columns: Vec<&str> = line.split('\t').collect();
                x.push(parse_factor(idx + 1, &columns, 2)?);
                y.push(parse_factor(idx + 1, &columns, 3)?);
                if int.len() < geometry.int {
                    int.push(parse_factor(idx + 1, &columns, 4)?);
                }
            }
            Ok(CalibrationUpload::Position { x, y, int })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> ChannelGeometry {
        ChannelGeometry {
            x: 3,
            y: 3,
            z: 2,
            int: 2,
        }
    }

    #[test]
    fn range_file_parses_second_column() {
        let content = "ch\tfactor\n1\t1.5\n\n2\t0.75\n";
        let upload = validate_upload(content, CalibrationKind::Range, &geometry()).unwrap();
        assert_eq!(upload, CalibrationUpload::Range { z: vec![1.5, 0.75] });
    }

    #[test]
    fn position_file_reads_int_for_first_channels_only() {
        let content = "ch\tx\ty\tint\n1\t1.1\t1.2\t0.9\n2\t1.0\t1.0\t0.8\n3\t2.0\t2.0\n";
        let upload = validate_upload(content, CalibrationKind::Position, &geometry()).unwrap();
        assert_eq!(
            upload,
            CalibrationUpload::Position {
                x: vec![1.1, 1.0, 2.0],
                y: vec![1.2, 1.0, 2.0],
                int: vec![0.9, 0.8],
            }
        );
    }

    #[test]
    fn wrong_line_count_is_a_format_error() {
        let err = validate_upload("h\n1\t1\n", CalibrationKind::Range, &geometry()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CalibrationFormat {
                expected: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn bad_number_reports_line() {
        let err = validate_upload("h\n1\t1\n2\tabc\n", CalibrationKind::Range, &geometry())
            .unwrap_err();
        assert!(matches!(err, SessionError::CalibrationValue { line: 3, .. }));
    }

    #[test]
    fn record_overlay_clips_integral_channels() {
        let mut factors = CalibrationFactors::unity(&geometry());
        let record = CalibrationRecord {
            int_calib: vec![0.5, 0.6, 0.7],
            ..Default::default()
        };
        factors.apply_record(CalibrationKind::Position, &record);
        assert_eq!(factors.int, vec![0.5, 0.6]);
        assert_eq!(factors.x, vec![1.0; 3]);
    }

    #[test]
    fn save_record_uses_wire_names() {
        let factors = CalibrationFactors::unity(&geometry());
        let record = CalibrationRecord::for_save(CalibrationKind::Range, "beam_a", &factors);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["filename_Z"], "beam_a");
        assert_eq!(json["Z_calib"].as_array().unwrap().len(), 2);
        assert_eq!(sanitize_filename("beam a 2"), "beam_a_2");
    }
}
