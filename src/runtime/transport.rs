//! WebSocket link to the device control unit.
//!
//! The link task owns the socket. It reports what happens on the wire as
//! [`TransportEvent`]s and reconnects after `reconnect_delay` whenever the
//! socket goes away. The session closes the link by dropping the outbound
//! sender it got with [`TransportEvent::Opened`].

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_CAPACITY: usize = 64;

/// What the link task reports to the session.
#[derive(Debug)]
pub enum TransportEvent {
    /// Socket open; frames sent on `outbound` go to the device.
    Opened {
        /// Frame queue of the link task
        outbound: mpsc::Sender<String>,
    },
    /// One text frame from the device.
    Frame(String),
    /// Socket closed; the task reconnects after the configured delay.
    Closed {
        /// Close frame reason or I/O error text
        reason: String,
    },
}

/// Connect, pump frames, reconnect. Returns when `shutdown` flips to `true`
/// or the session stops listening.
pub async fn run_link(
    url: Url,
    reconnect_delay: Duration,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(%url, "Device link task started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                let reason = pump(stream, &events, &mut shutdown).await;
                if events.send(TransportEvent::Closed { reason }).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "Connection attempt failed");
            }
        }
        if *shutdown.borrow() || events.is_closed() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.changed() => {}
        }
    }
    info!("Device link task stopped");
}

async fn pump(
    stream: WsStream,
    events: &mpsc::Sender<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> String {
    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    if events
        .send(TransportEvent::Opened {
            outbound: outbound_tx,
        })
        .await
        .is_err()
    {
        let _ = sink.close().await;
        return "session stopped".to_string();
    }

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %err, "Send failed");
                        return err.to_string();
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return "closed by session".to_string();
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Frame(text.as_str().to_string())).await.is_err() {
                        return "session stopped".to_string();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return frame
                        .map(|frame| frame.reason.as_str().to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by device".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return err.to_string(),
                None => return "stream ended".to_string(),
            },
            _ = shutdown.changed() => {
                let _ = sink.close().await;
                return "shutdown".to_string();
            }
        }
    }
}
