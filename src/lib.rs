//! # Detector Session Core
//!
//! Client-side session layer for a remote detector data-acquisition unit. The
//! crate talks to the device control unit over a WebSocket, keeps track of the
//! link and of the acquisition state, and turns device events and operator
//! requests into commands and rendering requests.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: JSON envelope, the closed catalog of inbound actions and
//!   the outbound command constructors.
//! - **`state`**: acquisition state machine with control-unit and HV
//!   indicators.
//! - **`connection`**: link state and keepalive watchdog.
//! - **`alarms`**: device error log with duplicate suppression and the forced
//!   shutdown on device errors.
//! - **`settings`**, **`calibration`**, **`catalog`**: operator settings,
//!   calibration factors and the cached file lists of the device logbook.
//! - **`session`**: [`session::DeviceSession`], the sans-IO facade tying the
//!   above together. Every entry point takes the current time and returns
//!   [`effects::Effect`]s.
//! - **`runtime`**: tokio actor owning a session plus the WebSocket link task.
//! - **`presenter`**: rendering interface used by the runtime.
//! - **`config`**, **`error`**, **`tracing_setup`**, **`timer`**: ambient
//!   plumbing.

pub mod alarms;
pub mod calibration;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod effects;
pub mod error;
pub mod presenter;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod state;
pub mod timer;
pub mod tracing_setup;

pub use error::{AppResult, SessionError};
