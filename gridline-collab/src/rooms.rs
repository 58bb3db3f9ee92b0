//! In-process room relay.
//!
//! [`LoopbackHub`] plays the server side of the named-event channel: it
//! tracks which connection sits in which room, fans inbound events out to a
//! room, and records every outbound emit so a test (or a local demo server)
//! can answer them.
//!
//! ```text
//! LoopbackConnection ──emit──► LoopbackHub ──► emitted log
//!        ▲                          │
//!        └──── per-connection ◄─────┘ broadcast(room, event)
//!              UnboundedSender
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connection::Connection;
use crate::protocol::{InboundEvent, OutboundEvent, ProtocolError};

/// Counters for monitoring relay health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub events_emitted: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub active_connections: usize,
}

struct Peer {
    sender: mpsc::UnboundedSender<InboundEvent>,
    connected: Arc<AtomicBool>,
}

#[derive(Default)]
struct HubState {
    peers: HashMap<String, Peer>,
    rooms: HashMap<String, HashSet<String>>,
    emitted: Vec<(String, OutboundEvent)>,
    stats: RelayStats,
}

/// Room registry shared by every [`LoopbackConnection`] it hands out.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection. The receiver yields what the hub delivers to it,
    /// starting with [`InboundEvent::Connect`].
    pub fn connect(&self) -> (LoopbackConnection, mpsc::UnboundedReceiver<InboundEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();
        let connected = Arc::new(AtomicBool::new(true));
        let _ = sender.send(InboundEvent::Connect);
        {
            let mut state = self.lock();
            state.peers.insert(
                id.clone(),
                Peer {
                    sender,
                    connected: connected.clone(),
                },
            );
            state.stats.active_connections = state.peers.len();
        }
        log::debug!("Loopback connection {id} opened");
        (
            LoopbackConnection {
                id,
                connected,
                hub: self.clone(),
            },
            receiver,
        )
    }

    /// Drop a connection from every room and deliver
    /// [`InboundEvent::Disconnect`] to it.
    pub fn disconnect(&self, connection_id: &str) {
        let mut state = self.lock();
        if let Some(peer) = state.peers.get(connection_id) {
            peer.connected.store(false, Ordering::Release);
            let _ = peer.sender.send(InboundEvent::Disconnect);
        }
        for members in state.rooms.values_mut() {
            members.remove(connection_id);
        }
        state.rooms.retain(|_, members| !members.is_empty());
    }

    /// Bring a disconnected connection back and deliver
    /// [`InboundEvent::Connect`].
    pub fn reconnect(&self, connection_id: &str) {
        let state = self.lock();
        if let Some(peer) = state.peers.get(connection_id) {
            peer.connected.store(true, Ordering::Release);
            let _ = peer.sender.send(InboundEvent::Connect);
        }
    }

    /// Deliver an event to every connection in `room`. Returns the number of
    /// receivers reached.
    pub fn broadcast(&self, room: &str, event: InboundEvent) -> usize {
        let mut state = self.lock();
        let members: Vec<String> = state
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        let mut delivered = 0;
        for member in members {
            if deliver(&mut state, &member, event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver an event to one connection.
    pub fn send_to(&self, connection_id: &str, event: InboundEvent) -> bool {
        deliver(&mut self.lock(), connection_id, event)
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .lock()
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub fn is_member(&self, room: &str, connection_id: &str) -> bool {
        self.lock()
            .rooms
            .get(room)
            .is_some_and(|m| m.contains(connection_id))
    }

    pub fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }

    /// Every event emitted so far, with the emitting connection id.
    pub fn emitted(&self) -> Vec<(String, OutboundEvent)> {
        self.lock().emitted.clone()
    }

    /// Drain the emitted log.
    pub fn take_emitted(&self) -> Vec<(String, OutboundEvent)> {
        std::mem::take(&mut self.lock().emitted)
    }

    pub fn stats(&self) -> RelayStats {
        self.lock().stats.clone()
    }

    fn record(&self, connection_id: &str, event: OutboundEvent) {
        let mut state = self.lock();
        match &event {
            OutboundEvent::JoinRoom(room) => {
                state
                    .rooms
                    .entry(room.clone())
                    .or_default()
                    .insert(connection_id.to_string());
            }
            OutboundEvent::LeaveRoom(room) => {
                if let Some(members) = state.rooms.get_mut(room) {
                    members.remove(connection_id);
                    if members.is_empty() {
                        state.rooms.remove(room);
                    }
                }
            }
            _ => {}
        }
        state.stats.events_emitted += 1;
        state.emitted.push((connection_id.to_string(), event));
    }
}

fn deliver(state: &mut HubState, connection_id: &str, event: InboundEvent) -> bool {
    let sent = state
        .peers
        .get(connection_id)
        .filter(|peer| peer.connected.load(Ordering::Acquire))
        .is_some_and(|peer| peer.sender.send(event).is_ok());
    if sent {
        state.stats.events_delivered += 1;
    } else {
        state.stats.events_dropped += 1;
    }
    sent
}

/// Client end of a [`LoopbackHub`].
pub struct LoopbackConnection {
    id: String,
    connected: Arc<AtomicBool>,
    hub: LoopbackHub,
}

impl Connection for LoopbackConnection {
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
        self.hub.record(&self.id, event);
        Ok(())
    }
}
