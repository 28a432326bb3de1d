//! Custom error types for the session core.
//!
//! This module defines `SessionError`, the single error type used across the crate.
//! Using the `thiserror` crate, it gives a consistent way to report failures from
//! configuration loading, protocol decoding, calibration validation and the
//! WebSocket transport.
//!
//! ## Error Hierarchy
//!
//! - **`NotConnected`**: a command was attempted while the transport is closed. The
//!   session surfaces this as a notification and drops the command; it is never
//!   queued.
//! - **`MissingAction` / `UnknownAction` / `MalformedPayload`**: inbound envelopes the
//!   dispatcher could not route. These are logged and discarded, never shown to the
//!   user, so newer device firmware cannot break an older client.
//! - **`CalibrationFormat` / `CalibrationValue`**: an uploaded calibration file does
//!   not match the configured channel geometry. Nothing is applied.
//! - **`Configuration`**: semantic configuration problems found by `validate()`.
//! - **`Config`**, **`Io`**, **`Json`**, **`Url`**, **`Transport`**: wrapped errors
//!   from the underlying crates.
//!
//! `#[from]` conversions let library code use `?` throughout.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, SessionError>;

/// Errors raised by the session client.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Figment failed to load or extract the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but rejected by validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or console I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Device address does not form a valid URL.
    #[error("Invalid device URL: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket failure.
    #[error("Transport error: {0}")]
    Transport(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Operation needs the device link.
    #[error("Device not connected")]
    NotConnected,

    /// Inbound frame without an action.
    #[error("Envelope has no action field")]
    MissingAction,

    /// Inbound action outside the catalog.
    #[error("Unrecognized action '{0}'")]
    UnknownAction(String),

    /// Known action with an unusable payload.
    #[error("Malformed payload for '{action}': {reason}")]
    MalformedPayload {
        /// Action name
        action: String,
        /// What was wrong
        reason: String,
    },

    /// Uploaded calibration file has the wrong number of lines.
    #[error("Unrecognized calibration file format: expected {expected} lines, found {found}")]
    CalibrationFormat {
        /// Lines required for the calibration kind
        expected: usize,
        /// Lines present
        found: usize,
    },

    /// Uploaded calibration file has a missing or non-numeric factor.
    #[error("Invalid calibration value on line {line}: {reason}")]
    CalibrationValue {
        /// Offending line
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// Logging could not be set up.
    #[error("Tracing initialization failed: {0}")]
    Tracing(String),

    /// The session actor task has exited.
    #[error("Session actor is no longer running")]
    ActorClosed,
}

impl From<figment::Error> for SessionError {
    fn from(value: figment::Error) -> Self {
        SessionError::Config(Box::new(value))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(Box::new(value))
    }
}

impl SessionError {
    /// Builds a [`SessionError::MalformedPayload`] for the given action.
    pub fn malformed(action: impl Into<String>, reason: impl ToString) -> Self {
        SessionError::MalformedPayload {
            action: action.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error belongs to the protocol-decode family.
    ///
    /// Decode failures are logged and discarded by the dispatcher instead of
    /// being surfaced to the user.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            SessionError::MissingAction
                | SessionError::UnknownAction(_)
                | SessionError::MalformedPayload { .. }
                | SessionError::Json(_)
        )
    }
}
