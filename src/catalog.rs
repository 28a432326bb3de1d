//! Cached device file lists.
//!
//! The device logger answers scan requests with the full list of stored files.
//! [`FileCatalog`] keeps the latest answer per list so the session can check
//! for name clashes (overwrite confirmation) without another round trip.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lists of selectable files kept on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileCatalogKind {
    /// Position calibration files
    PositionCalibration,
    /// Range calibration files
    RangeCalibration,
    /// Background reference files
    Background,
}

impl fmt::Display for FileCatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileCatalogKind::PositionCalibration => write!(f, "position-calibration"),
            FileCatalogKind::RangeCalibration => write!(f, "range-calibration"),
            FileCatalogKind::Background => write!(f, "background"),
        }
    }
}

/// Recorded run families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunKind {
    /// Profile runs
    Position,
    /// Integral chamber runs
    Integral,
    /// Range runs, listing only
    Range,
}

impl RunKind {
    /// Infix used by the logger commands (`log_scan_<infix>_files`).
    pub fn wire_name(&self) -> &'static str {
        match self {
            RunKind::Position => "profile",
            RunKind::Integral => "int",
            RunKind::Range => "range",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// How a refreshed list should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListPresentation {
    /// Cache only
    Hidden,
    /// Refresh the selector, typically at page initialization
    Init,
    /// Open the listing dialog
    Modal,
}

/// One stored run with its notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEntry {
    /// Run file name
    pub name: String,
    /// Operator notes, possibly empty
    pub notes: String,
}

/// Pair run names with their notes. Missing notes become empty.
pub fn zip_runs(run_list: Vec<String>, notes_list: Vec<String>) -> Vec<RunEntry> {
    let mut notes = notes_list.into_iter();
    run_list
        .into_iter()
        .map(|name| RunEntry {
            name,
            notes: notes.next().unwrap_or_default(),
        })
        .collect()
}

/// Latest known file lists.
#[derive(Debug, Clone, Default)]
pub struct FileCatalog {
    files: HashMap<FileCatalogKind, Vec<String>>,
    runs: HashMap<RunKind, Vec<RunEntry>>,
}

impl FileCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one file list with a fresh device listing.
    pub fn replace_files(&mut self, kind: FileCatalogKind, files: Vec<String>) {
        self.files.insert(kind, files);
    }

    /// Cached names of one list.
    pub fn files(&self, kind: FileCatalogKind) -> &[String] {
        self.files.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `name` is already stored in the given list.
    pub fn contains(&self, kind: FileCatalogKind, name: &str) -> bool {
        self.files(kind).iter().any(|file| file == name)
    }

    /// Replace one run list.
    pub fn replace_runs(&mut self, kind: RunKind, entries: Vec<RunEntry>) {
        self.runs.insert(kind, entries);
    }

    /// Cached runs of one family.
    pub fn runs(&self, kind: RunKind) -> &[RunEntry] {
        self.runs.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}
