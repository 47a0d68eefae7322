//! Manifest-backed scene content and a generic proxy entity.
//!
//! Lets a server populate a world without a game engine: a JSON manifest
//! lists placements per spawn category plus pre-authored entities, and the
//! [`ProxyFactory`] turns every record into a [`ProxyEntity`] that replicates
//! its transform.
//!
//! ```json
//! {
//!   "scene_id": "forest",
//!   "prefabs": ["portal", "merchant", "wolf_area"],
//!   "categories": {
//!     "warp_portals": [{ "prefab": "portal", "position": { "x": 0, "y": 0, "z": 5 } }],
//!     "monsters": [{ "prefab": "wolf_area", "position": { "x": 3, "y": 0, "z": 3 }, "params": { "count": 4 } }]
//!   }
//! }
//! ```

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::entity::{shared, SharedEntity, SyncEntity};
use crate::error::{SyncError, SyncResult};
use crate::spawner::{EntityFactory, Placement, SceneContent, SpawnCategory};
use crate::types::{ConnectionId, EntityId, Timestamp, Vec3};

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Statically placed entity in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoredEntity {
    pub id: EntityId,
    pub prefab: String,
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default)]
    pub owner: Option<ConnectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    pub scene_id: String,
    #[serde(default)]
    pub start_position: Vec3,
    /// Prefab catalog for the proxy factory; empty accepts every prefab.
    #[serde(default)]
    pub prefabs: Vec<String>,
    #[serde(default)]
    pub categories: HashMap<SpawnCategory, Vec<Placement>>,
    #[serde(default)]
    pub entities: Vec<AuthoredEntity>,
}

/// [`SceneContent`] backed by a [`SceneManifest`].
#[derive(Debug, Clone)]
pub struct ManifestScene {
    manifest: SceneManifest,
}

impl ManifestScene {
    pub fn new(manifest: SceneManifest) -> Self {
        Self { manifest }
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_path(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn manifest(&self) -> &SceneManifest {
        &self.manifest
    }
}

impl SceneContent for ManifestScene {
    fn scene_id(&self) -> &str {
        &self.manifest.scene_id
    }

    fn placements(&self, category: SpawnCategory) -> Option<Vec<Placement>> {
        self.manifest.categories.get(&category).cloned()
    }

    fn scene_entities(&self) -> Vec<SharedEntity> {
        self.manifest
            .entities
            .iter()
            .map(|e| {
                let mut proxy = ProxyEntity::new(e.id, &e.prefab, e.position);
                proxy.rotation = e.rotation;
                proxy.owner = e.owner;
                shared(proxy)
            })
            .collect()
    }

    fn start_position(&self) -> Vec3 {
        self.manifest.start_position
    }
}

// ---------------------------------------------------------------------------
// Proxy entity
// ---------------------------------------------------------------------------

/// Leading payload byte identifying a proxy transform.
pub const PROXY_STATE_KIND: u8 = 0x50;

/// Kind byte + position + rotation, all `f32` big-endian.
pub const PROXY_STATE_LEN: usize = 1 + 6 * 4;

/// Generic replicated entity carrying only a transform.
#[derive(Debug, Clone)]
pub struct ProxyEntity {
    pub id: EntityId,
    pub prefab: String,
    pub owner: Option<ConnectionId>,
    pub enabled: bool,
    pub position: Vec3,
    pub rotation: Vec3,
    /// Timestamp of the last state applied to this proxy.
    pub last_state_at: Option<Timestamp>,
}

impl ProxyEntity {
    pub fn new(id: EntityId, prefab: &str, position: Vec3) -> Self {
        Self {
            id,
            prefab: prefab.to_string(),
            owner: None,
            enabled: true,
            position,
            rotation: Vec3::zero(),
            last_state_at: None,
        }
    }

    pub fn owned_by(mut self, owner: ConnectionId) -> Self {
        self.owner = Some(owner);
        self
    }

    fn write_transform(&self, out: &mut BytesMut) {
        out.put_u8(PROXY_STATE_KIND);
        for v in [self.position, self.rotation] {
            out.put_f32(v.x);
            out.put_f32(v.y);
            out.put_f32(v.z);
        }
    }

    fn read_transform(&mut self, timestamp: Timestamp, mut payload: &[u8]) -> SyncResult<()> {
        if payload.len() < PROXY_STATE_LEN {
            return Err(SyncError::MalformedState(self.id));
        }
        let kind = payload.get_u8();
        if kind != PROXY_STATE_KIND {
            return Err(SyncError::StateTypeMismatch {
                entity: self.id,
                expected: format!("{:#04x}", PROXY_STATE_KIND),
                found: format!("{:#04x}", kind),
            });
        }
        self.position = Vec3::new(payload.get_f32(), payload.get_f32(), payload.get_f32());
        self.rotation = Vec3::new(payload.get_f32(), payload.get_f32(), payload.get_f32());
        self.last_state_at = Some(timestamp);
        Ok(())
    }
}

impl SyncEntity for ProxyEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn write_server_state(&mut self, _timestamp: Timestamp, out: &mut BytesMut) -> bool {
        self.write_transform(out);
        true
    }

    fn read_server_state(&mut self, timestamp: Timestamp, payload: &[u8]) -> SyncResult<()> {
        self.read_transform(timestamp, payload)
    }

    fn write_client_state(&mut self, _timestamp: Timestamp, out: &mut BytesMut) -> bool {
        self.write_transform(out);
        true
    }

    fn read_client_state(&mut self, timestamp: Timestamp, payload: &[u8]) -> SyncResult<()> {
        self.read_transform(timestamp, payload)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Instantiates [`ProxyEntity`] values for any known prefab.
///
/// Spawner categories (monsters, harvestables, item drops) read an optional
/// `count` from the placement params and yield that many proxies.
#[derive(Debug)]
pub struct ProxyFactory {
    prefabs: HashSet<String>,
    next_id: u32,
}

impl ProxyFactory {
    /// An empty catalog accepts every prefab.
    pub fn new(prefabs: impl IntoIterator<Item = String>, first_id: u32) -> Self {
        Self {
            prefabs: prefabs.into_iter().collect(),
            next_id: first_id,
        }
    }

    pub fn for_manifest(manifest: &SceneManifest) -> Self {
        let first_id = manifest
            .entities
            .iter()
            .map(|e| e.id.0.saturating_add(1))
            .max()
            .unwrap_or(1);
        Self::new(manifest.prefabs.iter().cloned(), first_id)
    }

    fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn knows(&self, prefab: &str) -> bool {
        self.prefabs.is_empty() || self.prefabs.contains(prefab)
    }
}

impl EntityFactory for ProxyFactory {
    fn instantiate(
        &mut self,
        category: SpawnCategory,
        placement: &Placement,
    ) -> SyncResult<Vec<SharedEntity>> {
        if !self.knows(&placement.prefab) {
            return Err(SyncError::MissingPrefab {
                category,
                prefab: placement.prefab.clone(),
            });
        }
        let count = match category {
            SpawnCategory::Monsters | SpawnCategory::Harvestables | SpawnCategory::ItemDrops => {
                placement
                    .params
                    .get("count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1) as usize
            }
            SpawnCategory::WarpPortals | SpawnCategory::Npcs => 1,
        };
        let entities = (0..count)
            .map(|_| {
                let mut proxy = ProxyEntity::new(self.allocate(), &placement.prefab, placement.position);
                proxy.rotation = placement.rotation;
                shared(proxy)
            })
            .collect();
        Ok(entities)
    }

    fn instantiate_observer(&mut self, prefab: &str, position: Vec3) -> SyncResult<SharedEntity> {
        Ok(shared(ProxyEntity::new(self.allocate(), prefab, position)))
    }
}
