//! Transport seam.
//!
//! The engine only needs three things from a transport: a stable id that the
//! server echoes back on events this connection caused, a connected flag and
//! a fire-and-forget emit. [`WsConnection`] is the WebSocket implementation;
//! [`crate::rooms::LoopbackConnection`] is the in-process one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{InboundEvent, OutboundEvent, ProtocolError};

/// A bidirectional named-event channel.
pub trait Connection: Send + 'static {
    /// Stable per-connection id, carried as `socket_id` on outbound intents.
    fn connection_id(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Queue an event for sending. Never blocks.
    fn emit(&self, event: OutboundEvent) -> Result<(), ProtocolError>;
}

/// Transport lifecycle as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// WebSocket transport: JSON text frames, one writer task fed by a channel
/// and one reader task decoding frames into [`InboundEvent`]s.
pub struct WsConnection {
    id: String,
    url: String,
    connected: Arc<AtomicBool>,
    outgoing_tx: Option<mpsc::UnboundedSender<String>>,
    event_tx: mpsc::Sender<InboundEvent>,
    event_rx: Option<mpsc::Receiver<InboundEvent>>,
}

impl WsConnection {
    pub fn new(url: impl Into<String>, capacity: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            connected: Arc::new(AtomicBool::new(false)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the inbound event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<InboundEvent>> {
        self.event_rx.take()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else if self.outgoing_tx.is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Open the socket and spawn the reader/writer tasks.
    ///
    /// Delivers [`InboundEvent::Connect`] once the socket is up and
    /// [`InboundEvent::Disconnect`] when it closes.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url).await.map_err(|e| {
            log::warn!("WebSocket connect to {} failed: {e}", self.url);
            ProtocolError::ConnectionClosed
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        self.outgoing_tx = Some(out_tx);

        let connected = self.connected.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                    log::warn!("WebSocket write failed: {e}");
                    break;
                }
            }
            connected.store(false, Ordering::Release);
        });

        self.connected.store(true, Ordering::Release);
        log::info!("Connected to {} as {}", self.url, self.id);
        let _ = self.event_tx.send(InboundEvent::Connect).await;

        let event_tx = self.event_tx.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match InboundEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Dropping malformed frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            connected.store(false, Ordering::Release);
            log::info!("WebSocket closed");
            let _ = event_tx.send(InboundEvent::Disconnect).await;
        });

        Ok(())
    }
}

impl Connection for WsConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn emit(&self, event: OutboundEvent) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let text = event.encode()?;
        match &self.outgoing_tx {
            Some(tx) => tx.send(text).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}
