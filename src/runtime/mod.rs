//! Async runtime around the session core.
//!
//! - [`actor`]: the task that owns the [`DeviceSession`](crate::session::DeviceSession)
//! - [`messages`]: commands and the [`SessionHandle`] used to send them
//! - [`transport`]: the reconnecting WebSocket link

pub mod actor;
pub mod messages;
pub mod transport;

pub use actor::{spawn_session, SessionActor, SessionRuntime};
pub use messages::{SessionCommand, SessionHandle};
pub use transport::TransportEvent;
