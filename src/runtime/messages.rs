//! Messages between callers and the session actor.
//!
//! Commands travel over an mpsc channel; each one that produces a result
//! carries a oneshot sender for the reply. [`SessionHandle`] wraps the sending
//! side so callers never build commands by hand.
//!
//! ```text
//! caller                               SessionActor
//! ------                               ------------
//! handle.apply(intent)  -- mpsc -->    apply, perform effects
//!                       <-- oneshot -- effects
//! ```

use crate::connection::ConnectionEvent;
use crate::effects::{ConfirmId, Effect};
use crate::error::{AppResult, SessionError};
use crate::session::{SessionSnapshot, UserIntent};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Commands accepted by [`SessionActor`](super::SessionActor).
#[derive(Debug)]
pub enum SessionCommand {
    /// Apply an operator request. The reply carries the effects that were
    /// performed.
    Intent {
        /// Operator request
        intent: UserIntent,
        /// Reply channel
        response: oneshot::Sender<Vec<Effect>>,
    },
    /// Answer an outstanding confirmation.
    Confirm {
        /// Question being answered
        id: ConfirmId,
        /// Yes or no
        accepted: bool,
        /// Reply channel
        response: oneshot::Sender<Vec<Effect>>,
    },
    /// Request the device configuration (handshake).
    Begin {
        /// Signalled once the request is sent
        response: oneshot::Sender<()>,
    },
    /// Read the current session view.
    Snapshot {
        /// Reply channel
        response: oneshot::Sender<SessionSnapshot>,
    },
    /// Stop the actor loop and close the link.
    Shutdown {
        /// Signalled before the loop exits
        response: oneshot::Sender<()>,
    },
}

impl SessionCommand {
    /// Build an `Intent` and its reply receiver.
    pub fn intent(intent: UserIntent) -> (Self, oneshot::Receiver<Vec<Effect>>) {
        let (response, rx) = oneshot::channel();
        (Self::Intent { intent, response }, rx)
    }

    /// Build a `Confirm` and its reply receiver.
    pub fn confirm(id: ConfirmId, accepted: bool) -> (Self, oneshot::Receiver<Vec<Effect>>) {
        let (response, rx) = oneshot::channel();
        (
            Self::Confirm {
                id,
                accepted,
                response,
            },
            rx,
        )
    }

    /// Build a `Begin` and its reply receiver.
    pub fn begin() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Begin { response }, rx)
    }

    /// Build a `Snapshot` and its reply receiver.
    pub fn snapshot() -> (Self, oneshot::Receiver<SessionSnapshot>) {
        let (response, rx) = oneshot::channel();
        (Self::Snapshot { response }, rx)
    }

    /// Build a `Shutdown` and its reply receiver.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (response, rx) = oneshot::channel();
        (Self::Shutdown { response }, rx)
    }
}

/// Cloneable front end of a running session actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<SessionCommand>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self { commands, events }
    }

    async fn request<T>(
        &self,
        (command, rx): (SessionCommand, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::ActorClosed)?;
        rx.await.map_err(|_| SessionError::ActorClosed)
    }

    pub async fn apply(&self, intent: UserIntent) -> AppResult<Vec<Effect>> {
        self.request(SessionCommand::intent(intent)).await
    }

    pub async fn confirm(&self, id: ConfirmId, accepted: bool) -> AppResult<Vec<Effect>> {
        self.request(SessionCommand::confirm(id, accepted)).await
    }

    pub async fn begin(&self) -> AppResult<()> {
        self.request(SessionCommand::begin()).await
    }

    pub async fn snapshot(&self) -> AppResult<SessionSnapshot> {
        self.request(SessionCommand::snapshot()).await
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(SessionCommand::shutdown()).await
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
