//! Wire protocol.
//!
//! This module owns **every message that crosses the transport boundary**
//! between the server runtime and its clients.
//!
//! ## Message tags
//!
//! | Tag                    | Direction        | Delivery          | Body                 |
//! |------------------------|------------------|-------------------|----------------------|
//! | `SERVER_ENTITY_STATE`  | server → client  | unreliable        | [`EntityStateFrame`] |
//! | `CLIENT_ENTITY_STATE`  | client → server  | unreliable        | [`EntityStateFrame`] |
//! | `MAP_INFO`             | server → client  | reliable-ordered  | [`MapInfo`] (JSON)   |
//! | `WORLD_CLOCK`          | server → client  | reliable-ordered  | [`WorldClockUpdate`] |
//! | `PRESENCE`             | server → client  | reliable-ordered  | [`Presence`]         |
//! | `CLIENT_READY`         | client → server  | reliable-ordered  | [`ClientReady`]      |
//!
//! ## Design rules
//!
//! 1. Entity state frames are binary: a fixed-width `u32` entity id, a
//!    fixed-width `i64` timestamp, then the entity-defined payload. The payload
//!    length is implied by the enclosing transport frame.
//! 2. Control messages are snake_case JSON.
//! 3. Periodic broadcasts (presence, world clock) never carry entity ids.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{SyncError, SyncResult};
use crate::types::{EntityId, Timestamp};

// ---------------------------------------------------------------------------
// Tags & delivery
// ---------------------------------------------------------------------------

/// Message-type tag carried by every transport frame.
pub type MessageTag = u16;

pub mod tags {
    use super::MessageTag;

    pub const SERVER_ENTITY_STATE: MessageTag = 1;
    pub const CLIENT_ENTITY_STATE: MessageTag = 2;
    pub const MAP_INFO: MessageTag = 10;
    pub const WORLD_CLOCK: MessageTag = 11;
    pub const PRESENCE: MessageTag = 12;
    pub const CLIENT_READY: MessageTag = 20;
}

/// Delivery guarantee requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    ReliableOrdered,
    Unreliable,
}

// ---------------------------------------------------------------------------
// Entity state  (tags: SERVER_ENTITY_STATE / CLIENT_ENTITY_STATE)
// ---------------------------------------------------------------------------

/// `EntityState{entityId, timestamp, payload}`, sent in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStateFrame {
    pub entity_id: EntityId,
    pub timestamp: Timestamp,
    pub payload: Bytes,
}

impl EntityStateFrame {
    /// Fixed header: `u32` id + `i64` timestamp.
    pub const HEADER_LEN: usize = 4 + 8;

    pub fn new(entity_id: EntityId, timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self {
            entity_id,
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN + self.payload.len());
        Self::write_header(&mut buf, self.entity_id, self.timestamp);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Write only the header so callers can append the payload in place.
    pub fn write_header(buf: &mut BytesMut, entity_id: EntityId, timestamp: Timestamp) {
        buf.put_u32(entity_id.0);
        buf.put_i64(timestamp);
    }

    pub fn decode(mut frame: Bytes) -> SyncResult<Self> {
        if frame.len() < Self::HEADER_LEN {
            return Err(SyncError::FrameTooShort {
                needed: Self::HEADER_LEN,
                got: frame.len(),
            });
        }
        let entity_id = EntityId(frame.get_u32());
        let timestamp = frame.get_i64();
        Ok(Self {
            entity_id,
            timestamp,
            payload: frame,
        })
    }
}

// ---------------------------------------------------------------------------
// Map info  (tag: MAP_INFO)
// ---------------------------------------------------------------------------

/// Current map description, broadcast on connect and on every map change.
///
/// `type_name` lets the receiver detect a map-type desync before reading the
/// opaque `payload`. `extras` carries per-component blobs keyed by the
/// contributing manager component's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapInfo {
    pub map_id: String,
    pub type_name: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Vec<u8>>,
}

impl MapInfo {
    pub const DEFAULT_TYPE: &'static str = "map";

    pub fn new(map_id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            map_id: map_id.into(),
            type_name: type_name.into(),
            payload: Vec::new(),
            extras: BTreeMap::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// Periodic broadcasts  (tags: WORLD_CLOCK / PRESENCE)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldClockUpdate {
    /// In-world hour in `[0, 24)`.
    pub time_of_day: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Connections currently considered online.
    pub online: u32,
}

// ---------------------------------------------------------------------------
// Handshake  (tag: CLIENT_READY)
// ---------------------------------------------------------------------------

/// Sent once per scene by a client whose readiness gate has latched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReady {
    pub map_id: Option<String>,
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

pub fn encode_json<T: Serialize>(message: &T) -> SyncResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> SyncResult<T> {
    Ok(serde_json::from_slice(payload)?)
}
