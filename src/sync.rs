//! Entity state replication.
//!
//! Two independent channels, both framed as [`EntityStateFrame`]:
//!
//! * server → client: every enabled entity, once per tick, to its audience;
//! * client → server: each entity the client owns, once per tick.
//!
//! Receivers keep a per-`(entity, direction)` watermark and drop any frame
//! whose timestamp does not advance it. On the server a client frame is also
//! dropped when the sender is not the entity's recorded owner. Drops are
//! silent (counted in [`WorldStats`], never surfaced to the sender).

use bytes::{Bytes, BytesMut};
use log::{error, trace};
use std::collections::HashMap;

use crate::entity::{Audience, SharedEntity, SyncEntity};
use crate::error::SyncError;
use crate::protocol::{tags, Delivery, EntityStateFrame};
use crate::registry::EntityRegistry;
use crate::transport::{SendTarget, Transport};
use crate::types::{ConnectionId, EntityId, Timestamp, WorldStats};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Direction {
    ServerToClient,
    ClientToServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale,
    UnknownEntity,
    NotOwner,
    /// The entity refused the payload (type desync or malformed body).
    Rejected,
}

// ---------------------------------------------------------------------------
// Recency
// ---------------------------------------------------------------------------

/// Last accepted timestamp per `(entity, direction)`.
#[derive(Debug, Default)]
pub struct RecencyTable {
    last: HashMap<(EntityId, Direction), Timestamp>,
}

impl RecencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `timestamp` is strictly newer than the last accepted one.
    pub fn is_fresh(&self, entity: EntityId, direction: Direction, timestamp: Timestamp) -> bool {
        self.last
            .get(&(entity, direction))
            .map_or(true, |&last| timestamp > last)
    }

    pub fn commit(&mut self, entity: EntityId, direction: Direction, timestamp: Timestamp) {
        self.last.insert((entity, direction), timestamp);
    }

    pub fn last_accepted(&self, entity: EntityId, direction: Direction) -> Option<Timestamp> {
        self.last.get(&(entity, direction)).copied()
    }

    pub fn forget(&mut self, entity: EntityId) {
        self.last.remove(&(entity, Direction::ServerToClient));
        self.last.remove(&(entity, Direction::ClientToServer));
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Client side: apply a server-authoritative frame.
pub fn apply_server_state(
    registry: &EntityRegistry,
    recency: &mut RecencyTable,
    frame: &EntityStateFrame,
    stats: &mut WorldStats,
) -> ApplyOutcome {
    let Some(entity) = registry.get(frame.entity_id) else {
        stats.unknown_entity_drops += 1;
        return ApplyOutcome::UnknownEntity;
    };
    apply(
        entity,
        recency,
        Direction::ServerToClient,
        frame,
        stats,
        |e, ts, payload| e.read_server_state(ts, payload),
    )
}

/// Server side: apply a client-authoritative frame from `sender`.
///
/// Ownership is checked before recency so a non-owner cannot probe the
/// watermark of someone else's entity.
pub fn apply_client_state(
    registry: &EntityRegistry,
    recency: &mut RecencyTable,
    sender: ConnectionId,
    frame: &EntityStateFrame,
    stats: &mut WorldStats,
) -> ApplyOutcome {
    let Some(entity) = registry.get(frame.entity_id) else {
        stats.unknown_entity_drops += 1;
        return ApplyOutcome::UnknownEntity;
    };
    if entity.lock().owner() != Some(sender) {
        stats.authority_drops += 1;
        trace!("dropped client state for {} from {}", frame.entity_id, sender);
        return ApplyOutcome::NotOwner;
    }
    apply(
        entity,
        recency,
        Direction::ClientToServer,
        frame,
        stats,
        |e, ts, payload| e.read_client_state(ts, payload),
    )
}

fn apply<F>(
    entity: &SharedEntity,
    recency: &mut RecencyTable,
    direction: Direction,
    frame: &EntityStateFrame,
    stats: &mut WorldStats,
    read: F,
) -> ApplyOutcome
where
    F: FnOnce(&mut (dyn SyncEntity + 'static), Timestamp, &[u8]) -> Result<(), SyncError>,
{
    if !recency.is_fresh(frame.entity_id, direction, frame.timestamp) {
        stats.stale_drops += 1;
        return ApplyOutcome::Stale;
    }
    let mut guard = entity.lock();
    match read(&mut *guard, frame.timestamp, &frame.payload) {
        Ok(()) => {
            recency.commit(frame.entity_id, direction, frame.timestamp);
            ApplyOutcome::Applied
        }
        Err(e) => {
            error!("Discarding state for {}: {}", frame.entity_id, e);
            stats.desync_drops += 1;
            ApplyOutcome::Rejected
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Reusable frame buffer for the send passes.
#[derive(Debug, Default)]
pub struct StateWriter {
    buf: BytesMut,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server: send every enabled entity's state to its audience. Returns the
    /// number of frames produced.
    pub fn send_server_states(
        &mut self,
        registry: &EntityRegistry,
        timestamp: Timestamp,
        transport: &mut dyn Transport,
    ) -> usize {
        let mut frames = 0;
        for entity in registry.dense() {
            let mut e = entity.lock();
            if !e.is_enabled() {
                continue;
            }
            let Some(frame) = self.frame(e.id(), timestamp, |out| e.write_server_state(timestamp, out))
            else {
                continue;
            };
            match e.audience() {
                Audience::All => send_state(transport, SendTarget::All, frame),
                Audience::Owner => {
                    if let Some(owner) = e.owner() {
                        send_state(transport, SendTarget::Connection(owner), frame);
                    }
                }
                Audience::Only(connections) => {
                    for connection in connections {
                        send_state(transport, SendTarget::Connection(connection), frame.clone());
                    }
                }
            }
            frames += 1;
        }
        frames
    }

    /// Client: send state for every enabled entity owned by `local`.
    pub fn send_client_states(
        &mut self,
        registry: &EntityRegistry,
        local: ConnectionId,
        timestamp: Timestamp,
        transport: &mut dyn Transport,
    ) -> usize {
        let mut frames = 0;
        for entity in registry.dense() {
            let mut e = entity.lock();
            if !e.is_enabled() || e.owner() != Some(local) {
                continue;
            }
            let Some(frame) = self.frame(e.id(), timestamp, |out| e.write_client_state(timestamp, out))
            else {
                continue;
            };
            transport.send(
                SendTarget::Server,
                Delivery::Unreliable,
                tags::CLIENT_ENTITY_STATE,
                frame,
            );
            frames += 1;
        }
        frames
    }

    fn frame<F>(&mut self, id: EntityId, timestamp: Timestamp, write: F) -> Option<Bytes>
    where
        F: FnOnce(&mut BytesMut) -> bool,
    {
        self.buf.clear();
        EntityStateFrame::write_header(&mut self.buf, id, timestamp);
        if !write(&mut self.buf) {
            return None;
        }
        Some(self.buf.split().freeze())
    }
}

fn send_state(transport: &mut dyn Transport, target: SendTarget, frame: Bytes) {
    transport.send(target, Delivery::Unreliable, tags::SERVER_ENTITY_STATE, frame);
}
