//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use realm_sync::{
    component::ManagerComponent,
    entity::{shared, SharedEntity, SyncEntity, TickContext},
    error::{SyncError, SyncResult},
    readiness::ReadinessStates,
    spawner::{
        EntityFactory, Placement, SceneContent, SpawnCategory, SpawnObserver, SpawnProgress,
    },
    types::{ConnectionId, EntityId, Side, Timestamp, Vec3},
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Test entity
// ---------------------------------------------------------------------------

pub const TEST_KIND: u8 = b'T';

/// Observable side of a [`TestEntity`], shared with the test body.
#[derive(Debug, Default)]
pub struct Probe {
    pub value: u32,
    pub last_timestamp: Option<Timestamp>,
    pub updates: u32,
    pub late_updates: u32,
}

pub type ProbeHandle = Arc<Mutex<Probe>>;

pub struct TestEntity {
    pub id: EntityId,
    pub owner: Option<ConnectionId>,
    pub enabled: bool,
    pub probe: ProbeHandle,
    pub despawn_on_update: bool,
    pub spawn_on_update: Option<SharedEntity>,
    pub request_physics: bool,
}

impl TestEntity {
    pub fn new(id: u32) -> Self {
        Self {
            id: EntityId(id),
            owner: None,
            enabled: true,
            probe: Arc::new(Mutex::new(Probe::default())),
            despawn_on_update: false,
            spawn_on_update: None,
            request_physics: false,
        }
    }

    pub fn owned_by(mut self, owner: i64) -> Self {
        self.owner = Some(ConnectionId(owner));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_value(self, value: u32) -> Self {
        self.probe.lock().value = value;
        self
    }

    pub fn probe(&self) -> ProbeHandle {
        self.probe.clone()
    }

    fn read(&mut self, timestamp: Timestamp, mut payload: &[u8]) -> SyncResult<()> {
        if payload.len() < 5 {
            return Err(SyncError::MalformedState(self.id));
        }
        let kind = payload.get_u8();
        if kind != TEST_KIND {
            return Err(SyncError::StateTypeMismatch {
                entity: self.id,
                expected: "T".into(),
                found: format!("{}", kind),
            });
        }
        let mut probe = self.probe.lock();
        probe.value = payload.get_u32();
        probe.last_timestamp = Some(timestamp);
        Ok(())
    }

    fn write(&self, out: &mut BytesMut) -> bool {
        out.put_u8(TEST_KIND);
        out.put_u32(self.probe.lock().value);
        true
    }
}

impl SyncEntity for TestEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn owner(&self) -> Option<ConnectionId> {
        self.owner
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn update(&mut self, ctx: &mut TickContext<'_>) {
        self.probe.lock().updates += 1;
        if self.request_physics {
            ctx.request_physics_sync();
        }
        if let Some(entity) = self.spawn_on_update.take() {
            ctx.spawn(entity);
        }
        if self.despawn_on_update {
            ctx.despawn(self.id);
        }
    }

    fn late_update(&mut self, _ctx: &mut TickContext<'_>) {
        self.probe.lock().late_updates += 1;
    }

    fn write_server_state(&mut self, _timestamp: Timestamp, out: &mut BytesMut) -> bool {
        self.write(out)
    }

    fn read_server_state(&mut self, timestamp: Timestamp, payload: &[u8]) -> SyncResult<()> {
        self.read(timestamp, payload)
    }

    fn write_client_state(&mut self, _timestamp: Timestamp, out: &mut BytesMut) -> bool {
        self.write(out)
    }

    fn read_client_state(&mut self, timestamp: Timestamp, payload: &[u8]) -> SyncResult<()> {
        self.read(timestamp, payload)
    }
}

/// Shared handle plus its probe.
pub fn entity(id: u32) -> (SharedEntity, ProbeHandle) {
    let e = TestEntity::new(id);
    let probe = e.probe();
    (shared(e), probe)
}

pub fn owned_entity(id: u32, owner: i64) -> (SharedEntity, ProbeHandle) {
    let e = TestEntity::new(id).owned_by(owner);
    let probe = e.probe();
    (shared(e), probe)
}

/// Test-entity state payload for `value`.
pub fn payload(value: u32) -> Vec<u8> {
    let mut out = vec![TEST_KIND];
    out.extend_from_slice(&value.to_be_bytes());
    out
}

// ---------------------------------------------------------------------------
// Scene content
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedScene {
    pub id: String,
    pub placements: HashMap<SpawnCategory, Vec<Placement>>,
    pub authored: Vec<u32>,
}

impl ScriptedScene {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// Every category present with `per_category` placements of prefab "p".
    pub fn uniform(id: &str, per_category: usize) -> Self {
        let mut scene = Self::new(id);
        for category in SpawnCategory::ORDER {
            scene = scene.with(category, &vec!["p"; per_category]);
        }
        scene
    }

    pub fn with(mut self, category: SpawnCategory, prefabs: &[&str]) -> Self {
        let placements = prefabs
            .iter()
            .enumerate()
            .map(|(i, p)| Placement::new(*p, Vec3::new(i as f32, 0.0, 0.0)))
            .collect();
        self.placements.insert(category, placements);
        self
    }

    pub fn with_authored(mut self, ids: &[u32]) -> Self {
        self.authored.extend_from_slice(ids);
        self
    }
}

impl SceneContent for ScriptedScene {
    fn scene_id(&self) -> &str {
        &self.id
    }

    fn placements(&self, category: SpawnCategory) -> Option<Vec<Placement>> {
        self.placements.get(&category).cloned()
    }

    fn scene_entities(&self) -> Vec<SharedEntity> {
        self.authored
            .iter()
            .map(|&id| shared(TestEntity::new(id)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct TestFactory {
    next_id: u32,
    missing: HashSet<String>,
}

impl TestFactory {
    pub fn new() -> Self {
        Self {
            next_id: 1000,
            missing: HashSet::new(),
        }
    }

    pub fn missing(mut self, prefab: &str) -> Self {
        self.missing.insert(prefab.to_string());
        self
    }
}

impl EntityFactory for TestFactory {
    fn instantiate(
        &mut self,
        category: SpawnCategory,
        placement: &Placement,
    ) -> SyncResult<Vec<SharedEntity>> {
        if self.missing.contains(&placement.prefab) {
            return Err(SyncError::MissingPrefab {
                category,
                prefab: placement.prefab.clone(),
            });
        }
        self.next_id += 1;
        Ok(vec![shared(TestEntity::new(self.next_id))])
    }

    fn instantiate_observer(&mut self, _prefab: &str, _position: Vec3) -> SyncResult<SharedEntity> {
        Ok(shared(TestEntity::new(9999)))
    }
}

// ---------------------------------------------------------------------------
// Progress observer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ProgressLog {
    pub starts: u32,
    pub finishes: u32,
    pub fractions: Vec<f32>,
    pub categories: Vec<Option<SpawnCategory>>,
}

#[derive(Clone, Default)]
pub struct RecordingObserver {
    pub log: Arc<Mutex<ProgressLog>>,
}

impl SpawnObserver for RecordingObserver {
    fn on_spawn_start(&mut self, _progress: &SpawnProgress<'_>) {
        self.log.lock().starts += 1;
    }

    fn on_spawn_progress(&mut self, progress: &SpawnProgress<'_>) {
        let mut log = self.log.lock();
        log.fractions.push(progress.fraction);
        log.categories.push(progress.category);
    }

    fn on_spawn_finish(&mut self, _progress: &SpawnProgress<'_>) {
        self.log.lock().finishes += 1;
    }
}

// ---------------------------------------------------------------------------
// Manager component
// ---------------------------------------------------------------------------

/// Contributes one readiness check backed by a shared flag and records every
/// hook it receives.
#[derive(Clone)]
pub struct FlagComponent {
    pub name: String,
    pub check: String,
    pub flag: Arc<AtomicBool>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub extra: Option<Vec<u8>>,
}

impl FlagComponent {
    pub fn new(name: &str, check: &str, initially: bool) -> Self {
        Self {
            name: name.to_string(),
            check: check.to_string(),
            flag: Arc::new(AtomicBool::new(initially)),
            events: Arc::new(Mutex::new(Vec::new())),
            extra: None,
        }
    }

    pub fn set(&self, ready: bool) {
        self.flag.store(ready, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl ManagerComponent for FlagComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start_server(&mut self) {
        self.record("start_server".into());
    }

    fn on_stop_server(&mut self) {
        self.record("stop_server".into());
    }

    fn on_start_client(&mut self) {
        self.record("start_client".into());
    }

    fn on_server_scene_loaded(&mut self, scene: &str) {
        self.record(format!("server_scene_loaded:{}", scene));
    }

    fn on_client_scene_loaded(&mut self, scene: &str) {
        self.record(format!("client_scene_loaded:{}", scene));
    }

    fn update_ready_states(&mut self, _side: Side, states: &mut ReadinessStates) {
        states.set(&self.check, self.flag.load(Ordering::SeqCst));
    }

    fn on_peer_connected(&mut self, connection: ConnectionId) {
        self.record(format!("peer:{}", connection.0));
    }

    fn on_presence_tick(&mut self, online: &[ConnectionId]) {
        self.record(format!("presence:{}", online.len()));
    }

    fn write_map_info_extra(&mut self) -> Option<Vec<u8>> {
        self.extra.clone()
    }

    fn read_map_info_extra(&mut self, extra: &[u8]) {
        self.record(format!("extra:{}", String::from_utf8_lossy(extra)));
    }

    fn pre_spawn(&mut self, scene: &str) {
        self.record(format!("pre_spawn:{}", scene));
    }

    fn post_spawn(&mut self, scene: &str) {
        self.record(format!("post_spawn:{}", scene));
    }

    fn on_player_admitted(&mut self, connection: ConnectionId) {
        self.record(format!("admitted:{}", connection.0));
    }

    fn clean(&mut self) {
        self.record("clean".into());
    }
}
