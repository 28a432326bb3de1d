//! Device wire protocol.
//!
//! - [`envelope`]: JSON text frames and [`Command`] encoding
//! - [`inbound`]: the closed [`ActionKind`] catalog and typed [`InboundMessage`]s
//! - [`outbound`]: constructors for every command the client sends

pub mod envelope;
pub mod inbound;
pub mod outbound;

pub use envelope::{Channel, Command, Envelope};
pub use inbound::{
    decode, Acknowledgement, ActionKind, InboundMessage, MessageFamily, PlotSource, PlotTarget,
    PlotUpdate, PlotView, ProfileAxis,
};
