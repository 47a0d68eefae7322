//! Transport collaborator boundary plus an in-memory loopback implementation.
//!
//! Real deployments plug a UDP/WebSocket transport in behind [`Transport`].
//! The loopback hub wires a server and any number of clients together inside
//! one process; it backs the integration tests and the standalone binary.

use bytes::Bytes;
use log::error;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::protocol::{encode_json, Delivery, MessageTag};
use crate::types::ConnectionId;

/// Connection id the loopback hub uses for the server end.
pub const SERVER_CONNECTION: ConnectionId = ConnectionId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// Every connected client (server side).
    All,
    Connection(ConnectionId),
    /// The server link (client side).
    Server,
}

/// One framed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub connection: ConnectionId,
    pub tag: MessageTag,
    pub payload: Bytes,
}

pub trait Transport: Send {
    /// Move every pending inbound message into `out`.
    fn drain_inbound(&mut self, out: &mut Vec<Inbound>);

    fn send(&mut self, target: SendTarget, delivery: Delivery, tag: MessageTag, payload: Bytes);

    /// Currently connected peers.
    fn connections(&self) -> Vec<ConnectionId>;

    /// This end's own connection id.
    fn local_connection(&self) -> ConnectionId;
}

/// Encode `message` as JSON and send it reliably. Encoding failures are
/// logged and the message is dropped.
pub fn send_json<T: Serialize>(
    transport: &mut dyn Transport,
    target: SendTarget,
    tag: MessageTag,
    message: &T,
) {
    match encode_json(message) {
        Ok(payload) => transport.send(target, Delivery::ReliableOrdered, tag, payload),
        Err(e) => error!("Failed to encode message {}: {}", tag, e),
    }
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HubState {
    server_inbox: VecDeque<Inbound>,
    client_inboxes: BTreeMap<ConnectionId, VecDeque<Inbound>>,
    next_connection: i64,
    sent: u64,
}

/// Shared in-process switchboard.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            hub: self.clone(),
            local: SERVER_CONNECTION,
        }
    }

    /// Register a new client and return its transport end.
    pub fn connect_client(&self) -> LoopbackTransport {
        let mut state = self.state.lock();
        state.next_connection += 1;
        let id = ConnectionId(state.next_connection);
        state.client_inboxes.insert(id, VecDeque::new());
        LoopbackTransport {
            hub: self.clone(),
            local: id,
        }
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        self.state.lock().client_inboxes.remove(&connection);
    }

    /// Total frames sent through the hub.
    pub fn sent(&self) -> u64 {
        self.state.lock().sent
    }
}

pub struct LoopbackTransport {
    hub: LoopbackHub,
    local: ConnectionId,
}

impl Transport for LoopbackTransport {
    fn drain_inbound(&mut self, out: &mut Vec<Inbound>) {
        let mut state = self.hub.state.lock();
        let inbox = if self.local == SERVER_CONNECTION {
            Some(&mut state.server_inbox)
        } else {
            state.client_inboxes.get_mut(&self.local)
        };
        if let Some(inbox) = inbox {
            out.extend(inbox.drain(..));
        }
    }

    fn send(&mut self, target: SendTarget, _delivery: Delivery, tag: MessageTag, payload: Bytes) {
        let mut state = self.hub.state.lock();
        let message = Inbound {
            connection: self.local,
            tag,
            payload,
        };
        match target {
            SendTarget::Server => {
                if self.local != SERVER_CONNECTION {
                    state.server_inbox.push_back(message);
                    state.sent += 1;
                }
            }
            SendTarget::Connection(id) => {
                if let Some(inbox) = state.client_inboxes.get_mut(&id) {
                    inbox.push_back(message);
                    state.sent += 1;
                }
            }
            SendTarget::All => {
                let mut delivered = 0;
                for inbox in state.client_inboxes.values_mut() {
                    inbox.push_back(message.clone());
                    delivered += 1;
                }
                state.sent += delivered;
            }
        }
    }

    fn connections(&self) -> Vec<ConnectionId> {
        if self.local == SERVER_CONNECTION {
            self.hub.state.lock().client_inboxes.keys().copied().collect()
        } else {
            vec![SERVER_CONNECTION]
        }
    }

    fn local_connection(&self) -> ConnectionId {
        self.local
    }
}
