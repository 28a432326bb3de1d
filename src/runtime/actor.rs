//! Session actor.
//!
//! [`SessionActor`] is the single owner of a [`DeviceSession`]. It runs in its
//! own tokio task and serializes everything that can touch the session:
//!
//! 1. transport events from the link task,
//! 2. [`SessionCommand`]s from [`SessionHandle`] clones,
//! 3. the earliest pending timer deadline.
//!
//! Effects returned by the session are performed in order: frames go to the
//! link, rendering requests go to the [`Presenter`], connection events are
//! broadcast to subscribers.

use super::messages::{SessionCommand, SessionHandle};
use super::transport::{run_link, TransportEvent};
use crate::config::SessionConfig;
use crate::connection::ConnectionEvent;
use crate::effects::Effect;
use crate::error::AppResult;
use crate::presenter::Presenter;
use crate::protocol::Command;
use crate::session::DeviceSession;
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 32;
const TRANSPORT_CAPACITY: usize = 256;
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// Tasks of a running session.
#[derive(Debug)]
pub struct SessionRuntime {
    /// Handle to drive the session
    pub handle: SessionHandle,
    /// Actor task
    pub actor: JoinHandle<()>,
    /// WebSocket link task
    pub link: JoinHandle<()>,
}

/// Start a session against the device named in `config`: one actor task and
/// one WebSocket link task.
pub fn spawn_session<P: Presenter>(config: &SessionConfig, presenter: P) -> AppResult<SessionRuntime> {
    let url = config.device.ws_url()?;
    let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (actor, handle, commands) = SessionActor::new(config, presenter);
    let actor = actor.with_shutdown(shutdown_tx);

    let link = tokio::spawn(run_link(
        url,
        config.session.reconnect_delay(),
        transport_tx,
        shutdown_rx,
    ));
    let actor = tokio::spawn(actor.run(commands, transport_rx));
    Ok(SessionRuntime {
        handle,
        actor,
        link,
    })
}

fn until(deadline: DateTime<Local>, now: DateTime<Local>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Owner of the session state.
pub struct SessionActor<P> {
    id: Uuid,
    session: DeviceSession,
    presenter: P,
    outbound: Option<mpsc::Sender<String>>,
    events: broadcast::Sender<ConnectionEvent>,
    shutdown: Option<watch::Sender<bool>>,
}

impl<P: Presenter> SessionActor<P> {
    /// Create the actor, its handle and the command receiver to pass to
    /// [`run`](Self::run).
    pub fn new(
        config: &SessionConfig,
        presenter: P,
    ) -> (Self, SessionHandle, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(config.session.command_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let handle = SessionHandle::new(command_tx, events.clone());
        let actor = Self {
            id: Uuid::new_v4(),
            session: DeviceSession::new(config, Local::now()),
            presenter,
            outbound: None,
            events,
            shutdown: None,
        };
        (actor, handle, command_rx)
    }

    /// Signal the link task on shutdown.
    pub fn with_shutdown(mut self, shutdown: watch::Sender<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Event loop. Returns after [`SessionCommand::Shutdown`] or once every
    /// handle is dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut transport: mpsc::Receiver<TransportEvent>,
    ) {
        let span = info_span!("session", id = %self.id, device = %self.session.device().name);
        async move {
            info!("Session actor started");
            let mut link_alive = true;
            loop {
                let wait = self
                    .session
                    .next_deadline()
                    .map(|deadline| until(deadline, Local::now()))
                    .unwrap_or(IDLE_WAKEUP);

                tokio::select! {
                    command = commands.recv() => {
                        let Some(command) = command else {
                            debug!("All session handles dropped");
                            break;
                        };
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    event = transport.recv(), if link_alive => match event {
                        Some(event) => self.handle_transport(event),
                        None => {
                            warn!("Link task ended");
                            link_alive = false;
                        }
                    },
                    _ = tokio::time::sleep(wait) => {
                        let effects = self.session.on_timers(Local::now());
                        self.perform(&effects);
                    }
                }
            }
            self.stop_link();
            info!("Session actor stopped");
        }
        .instrument(span)
        .await
    }

    /// Returns `false` when the loop must stop.
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Intent { intent, response } => {
                let effects = self.session.apply(intent, Local::now());
                self.perform(&effects);
                let _ = response.send(effects);
            }
            SessionCommand::Confirm {
                id,
                accepted,
                response,
            } => {
                let effects = self.session.resolve_confirmation(id, accepted, Local::now());
                self.perform(&effects);
                let _ = response.send(effects);
            }
            SessionCommand::Begin { response } => {
                let effects = self.session.begin(Local::now());
                self.perform(&effects);
                let _ = response.send(());
            }
            SessionCommand::Snapshot { response } => {
                let _ = response.send(self.session.snapshot(Local::now()));
            }
            SessionCommand::Shutdown { response } => {
                info!("Shutdown command received");
                self.stop_link();
                let _ = response.send(());
                return false;
            }
        }
        true
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        let now = Local::now();
        let effects = match event {
            TransportEvent::Opened { outbound } => {
                self.outbound = Some(outbound);
                self.session.on_transport_opened(now)
            }
            TransportEvent::Frame(raw) => self.session.dispatch(&raw, now),
            TransportEvent::Closed { reason } => {
                self.outbound = None;
                self.session.on_transport_closed(&reason)
            }
        };
        self.perform(&effects);
    }

    fn perform(&mut self, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::Transmit(command) => self.transmit(command),
                Effect::Notify(notification) => self.presenter.notify(notification),
                Effect::Confirm(request) => self.presenter.confirm(request),
                Effect::Ui(update) => self.presenter.update_ui(update),
                Effect::Connection(event) => {
                    // No subscribers is fine.
                    let _ = self.events.send(event.clone());
                }
                Effect::CloseTransport => {
                    debug!("Closing device link");
                    self.outbound = None;
                }
            }
        }
    }

    /// Queue a frame for the link without waiting. The link task may itself be
    /// blocked forwarding device frames to this actor, so a full queue drops
    /// the frame.
    fn transmit(&mut self, command: &Command) {
        let frame = match command.encode() {
            Ok(frame) => frame,
            Err(err) => {
                error!(%command, error = %err, "Failed to encode command");
                return;
            }
        };
        let Some(outbound) = &self.outbound else {
            warn!(%command, "No open link, frame dropped");
            return;
        };
        debug!(%command, "Sending");
        match outbound.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(%command, "Outbound queue full, frame dropped");
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%command, "Link closed while sending");
                self.outbound = None;
            }
        }
    }

    fn stop_link(&mut self) {
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::TracingPresenter;
    use crate::session::UserIntent;
    use crate::state::AcquisitionMode;

    #[test]
    fn until_never_negative() {
        let now = Local::now();
        assert_eq!(until(now - chrono::Duration::seconds(1), now), Duration::ZERO);
        assert_eq!(
            until(now + chrono::Duration::milliseconds(250), now),
            Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn intent_round_trip_through_actor() {
        let config = SessionConfig::default();
        let (actor, handle, commands) = SessionActor::new(&config, TracingPresenter);
        let (transport_tx, transport_rx) = mpsc::channel(8);
        let task = tokio::spawn(actor.run(commands, transport_rx));

        let (outbound, mut device) = mpsc::channel(8);
        transport_tx
            .send(TransportEvent::Opened { outbound })
            .await
            .unwrap();
        transport_tx
            .send(TransportEvent::Frame(
                r#"{"action":"connected","value":"{\"type\":0}"}"#.into(),
            ))
            .await
            .unwrap();
        while !handle.snapshot().await.unwrap().handshake_done {
            tokio::task::yield_now().await;
        }

        handle.apply(UserIntent::ToggleStreaming).await.unwrap();
        let frame = device.recv().await.unwrap();
        assert!(frame.contains("start_data_stream"));
        assert_eq!(
            handle.snapshot().await.unwrap().state.mode,
            AcquisitionMode::Streaming
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn full_outbound_queue_does_not_stall_actor() {
        let config = SessionConfig::default();
        let (actor, handle, commands) = SessionActor::new(&config, TracingPresenter);
        let (transport_tx, transport_rx) = mpsc::channel(8);
        let task = tokio::spawn(actor.run(commands, transport_rx));

        // Nobody drains the device side.
        let (outbound, _device) = mpsc::channel(1);
        transport_tx
            .send(TransportEvent::Opened { outbound })
            .await
            .unwrap();
        transport_tx
            .send(TransportEvent::Frame(
                r#"{"action":"connected","value":"{\"type\":0}"}"#.into(),
            ))
            .await
            .unwrap();
        while !handle.snapshot().await.unwrap().handshake_done {
            tokio::task::yield_now().await;
        }

        let burst = async {
            for _ in 0..4 {
                handle.apply(UserIntent::ResetCounters).await.unwrap();
            }
            handle.snapshot().await.unwrap()
        };
        let snapshot = tokio::time::timeout(Duration::from_secs(5), burst)
            .await
            .expect("actor stalled on a full outbound queue");
        assert!(snapshot.handshake_done);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
