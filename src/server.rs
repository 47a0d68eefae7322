//! ServerWorld – server-role orchestrator.
//!
//! Owns the registry, the server readiness gate, the player-admission latch,
//! the staged spawner and the server half of state sync. The host application
//! calls [`ServerWorld::on_server_tick`] once per frame.

use bytes::Bytes;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use crate::component::ManagerComponent;
use crate::entity::SharedEntity;
use crate::protocol::{decode_json, tags, ClientReady, EntityStateFrame, MapInfo, Presence};
use crate::readiness::{AdmissionLatch, ReadinessGate};
use crate::registry::EntityRegistry;
use crate::scheduler::{PassReport, PeriodicTimer, PhysicsSync, TickScheduler};
use crate::spawner::{
    EntityFactory, NoopSpawnObserver, SceneContent, SpawnEnv, SpawnObserver, SpawnOptions,
    SpawnPoll, SpawnTask,
};
use crate::sync::{apply_client_state, ApplyOutcome, RecencyTable, StateWriter};
use crate::transport::{send_json, Inbound, SendTarget, Transport};
use crate::types::{ConnectionId, EntityId, SessionClock, Side, SyncConfig, Timestamp, WorldStats};
use crate::world_clock::WorldClock;

// ---------------------------------------------------------------------------
// Tick result
// ---------------------------------------------------------------------------

/// What a single [`ServerWorld::on_server_tick`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerTickReport {
    pub tick: u64,
    pub timestamp: Timestamp,
    /// Inbound messages drained this tick.
    pub inbound: usize,
    /// Client state frames that were applied.
    pub applied: usize,
    pub presence_sent: bool,
    pub clock_sent: bool,
    pub physics_flushed: bool,
    pub spawn: Option<SpawnPoll>,
    pub passes: PassReport,
    /// Server state frames produced.
    pub states_sent: usize,
    /// Connections admitted this tick, in admission order.
    pub admitted: Vec<ConnectionId>,
}

pub struct ServerWorld {
    config: SyncConfig,
    clock: SessionClock,
    registry: EntityRegistry,
    gate: ReadinessGate,
    admission: AdmissionLatch,
    scheduler: TickScheduler,
    recency: RecencyTable,
    writer: StateWriter,
    presence_timer: PeriodicTimer,
    clock_timer: PeriodicTimer,
    world_clock: WorldClock,
    map_info: Option<MapInfo>,
    components: Vec<Box<dyn ManagerComponent>>,
    transport: Box<dyn Transport>,
    factory: Box<dyn EntityFactory>,
    observer: Box<dyn SpawnObserver>,
    spawn: Option<SpawnTask>,
    scene_generation: u64,
    peers: BTreeSet<ConnectionId>,
    pending_ready: VecDeque<ConnectionId>,
    /// Ready requests naming a map that is not current yet.
    early_ready: BTreeMap<ConnectionId, String>,
    admitted: BTreeSet<ConnectionId>,
    inbound: Vec<Inbound>,
    stats: WorldStats,
    tick_count: u64,
    running: bool,
}

impl ServerWorld {
    pub fn new(
        config: SyncConfig,
        transport: Box<dyn Transport>,
        factory: Box<dyn EntityFactory>,
    ) -> Self {
        Self {
            gate: ReadinessGate::new(Side::Server, config.instantiate_delay()),
            presence_timer: PeriodicTimer::from_secs(config.presence_interval_secs),
            clock_timer: PeriodicTimer::from_secs(config.world_clock_interval_secs),
            world_clock: WorldClock::new(config.day_length_secs, 0.0),
            config,
            clock: SessionClock::new(),
            registry: EntityRegistry::new(),
            admission: AdmissionLatch::new(),
            scheduler: TickScheduler::new(Side::Server),
            recency: RecencyTable::new(),
            writer: StateWriter::new(),
            map_info: None,
            components: Vec::new(),
            transport,
            factory,
            observer: Box::new(NoopSpawnObserver),
            spawn: None,
            scene_generation: 0,
            peers: BTreeSet::new(),
            pending_ready: VecDeque::new(),
            early_ready: BTreeMap::new(),
            admitted: BTreeSet::new(),
            inbound: Vec::new(),
            stats: WorldStats::default(),
            tick_count: 0,
            running: false,
        }
    }

    /// Components are called in registration order.
    pub fn add_component(&mut self, component: Box<dyn ManagerComponent>) {
        debug!("Registered manager component '{}'", component.name());
        self.components.push(component);
    }

    pub fn set_spawn_observer(&mut self, observer: Box<dyn SpawnObserver>) {
        self.observer = observer;
    }

    pub fn set_physics(&mut self, physics: Box<dyn PhysicsSync>) {
        self.scheduler = TickScheduler::with_physics(Side::Server, physics);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn on_start_server(&mut self) {
        info!("Server started (tick {:.0}Hz)", self.config.tick_rate_hz);
        self.running = true;
        for component in self.components.iter_mut() {
            component.on_start_server();
        }
    }

    pub fn on_stop_server(&mut self) {
        for component in self.components.iter_mut() {
            component.on_stop_server();
        }
        self.clean();
        self.running = false;
        info!("Server stopped");
    }

    /// Drop everything tied to the current session.
    pub fn clean(&mut self) {
        self.map_info = None;
        self.scene_generation += 1;
        self.spawn = None;
        self.gate.reset();
        self.admission.close();
        self.registry.clear();
        self.recency.clear();
        self.peers.clear();
        self.pending_ready.clear();
        self.early_ready.clear();
        self.admitted.clear();
        for component in self.components.iter_mut() {
            component.clean();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // -----------------------------------------------------------------------
    // Scenes
    // -----------------------------------------------------------------------

    /// A scene change has started. Any in-flight spawn task observes the new
    /// generation on its next resume and stops.
    pub fn server_scene_change(&mut self) {
        self.scene_generation += 1;
        self.spawn = None;
        self.gate.reset();
        self.admission.close();
        self.registry.clear();
        self.recency.clear();
        self.pending_ready.clear();
        self.admitted.clear();
        info!("Server scene change (generation {})", self.scene_generation);
    }

    /// The new scene finished loading; readiness gathering and staged spawning
    /// start on the next tick.
    pub fn on_scene_loaded(&mut self, content: Box<dyn SceneContent>) {
        let scene = content.scene_id().to_string();
        self.gate.on_scene_loaded(self.clock.elapsed());
        for component in self.components.iter_mut() {
            component.on_server_scene_loaded(&scene);
        }
        if self.map_info.as_ref().map(|m| m.map_id.as_str()) != Some(scene.as_str()) {
            self.set_map_info(MapInfo::new(scene.clone(), MapInfo::DEFAULT_TYPE));
        }
        let options = SpawnOptions {
            headless: self.config.headless,
            is_client: self.config.is_host,
            observer_prefab: self.config.observer_prefab.clone(),
        };
        self.spawn = Some(SpawnTask::new(self.scene_generation, content, options));
        info!("Server scene '{}' loaded", scene);
    }

    /// Store the current map and broadcast it to every connection.
    pub fn set_map_info(&mut self, mut info: MapInfo) {
        for component in self.components.iter_mut() {
            if let Some(extra) = component.write_map_info_extra() {
                info.extras.insert(component.name().to_string(), extra);
            }
        }
        send_json(
            self.transport.as_mut(),
            SendTarget::All,
            tags::MAP_INFO,
            &info,
        );
        let map_id = info.map_id.clone();
        self.map_info = Some(info);

        let matching: Vec<ConnectionId> = self
            .early_ready
            .iter()
            .filter(|(_, map)| **map == map_id)
            .map(|(connection, _)| *connection)
            .collect();
        for connection in matching {
            self.early_ready.remove(&connection);
            debug!("Map '{}' now current, queueing ready {}", map_id, connection);
            self.queue_ready(connection);
        }
    }

    pub fn map_info(&self) -> Option<&MapInfo> {
        self.map_info.as_ref()
    }

    pub fn scene_generation(&self) -> u64 {
        self.scene_generation
    }

    /// Progress of the running spawn task, `None` when no spawn is in flight.
    pub fn spawn_progress(&self) -> Option<f32> {
        self.spawn.as_ref().map(|task| task.progress())
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Send the current map and world clock to a newly connected peer.
    pub fn on_peer_connected(&mut self, connection: ConnectionId) {
        if !self.peers.insert(connection) {
            return;
        }
        debug!("Peer {} connected", connection);
        for component in self.components.iter_mut() {
            component.on_peer_connected(connection);
        }
        let target = SendTarget::Connection(connection);
        if let Some(info) = &self.map_info {
            send_json(self.transport.as_mut(), target, tags::MAP_INFO, info);
        }
        send_json(
            self.transport.as_mut(),
            target,
            tags::WORLD_CLOCK,
            &self.world_clock.to_update(),
        );
    }

    /// Forget the peer and despawn every entity it owned.
    pub fn on_peer_disconnected(&mut self, connection: ConnectionId) {
        if !self.peers.remove(&connection) {
            return;
        }
        self.pending_ready.retain(|c| *c != connection);
        self.early_ready.remove(&connection);
        self.admitted.remove(&connection);
        let owned: Vec<EntityId> = self
            .registry
            .dense()
            .iter()
            .filter_map(|e| {
                let e = e.lock();
                (e.owner() == Some(connection)).then(|| e.id())
            })
            .collect();
        for id in owned {
            self.unregister_entity(id);
        }
        debug!("Peer {} disconnected", connection);
    }

    pub fn peers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.peers.iter().copied()
    }

    pub fn is_admitted(&self, connection: ConnectionId) -> bool {
        self.admitted.contains(&connection)
    }

    pub fn pending_admissions(&self) -> usize {
        self.pending_ready.len()
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub fn register_entity(&mut self, entity: SharedEntity) -> bool {
        self.registry.register(entity)
    }

    pub fn unregister_entity(&mut self, id: EntityId) -> Option<SharedEntity> {
        self.recency.forget(id);
        self.registry.unregister(id)
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    pub fn is_ready_to_instantiate_objects(&self) -> bool {
        self.gate.is_latched()
    }

    pub fn is_ready_for_players(&self) -> bool {
        self.admission.is_open()
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    // -----------------------------------------------------------------------
    // Main tick
    // -----------------------------------------------------------------------

    /// Advance the server by one frame.
    pub fn on_server_tick(&mut self, dt: Duration) -> ServerTickReport {
        self.clock.advance(dt);
        self.tick_count += 1;
        let timestamp = self.clock.timestamp();
        let mut report = ServerTickReport {
            tick: self.tick_count,
            timestamp,
            ..Default::default()
        };

        // 1. inbound
        self.sync_peers();
        let mut inbound = std::mem::take(&mut self.inbound);
        self.transport.drain_inbound(&mut inbound);
        report.inbound = inbound.len();
        for message in inbound.drain(..) {
            if self.dispatch(message) {
                report.applied += 1;
            }
        }
        self.inbound = inbound;

        // 2. timers
        self.world_clock.advance(dt);
        if self.presence_timer.tick(dt) {
            self.broadcast_presence();
            report.presence_sent = true;
        }
        if self.clock_timer.tick(dt) {
            send_json(
                self.transport.as_mut(),
                SendTarget::All,
                tags::WORLD_CLOCK,
                &self.world_clock.to_update(),
            );
            report.clock_sent = true;
        }

        // 3. physics
        report.physics_flushed = self.scheduler.flush_physics();

        report.spawn = self.resume_spawn();
        report.admitted = self.admit_pending();

        // 4. simulation
        report.passes = self
            .scheduler
            .run_entity_passes(&mut self.registry, dt, timestamp);
        for &id in self.scheduler.despawned() {
            self.recency.forget(id);
        }

        // 5. outbound state
        report.states_sent =
            self.writer
                .send_server_states(&self.registry, timestamp, self.transport.as_mut());

        self.stats.total_ticks = self.tick_count;
        self.stats.registered = self.registry.len();
        report
    }

    pub fn stats(&self) -> WorldStats {
        let mut stats = self.stats.clone();
        stats.registered = self.registry.len();
        stats
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn session_time(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn world_clock(&self) -> &WorldClock {
        &self.world_clock
    }

    pub fn world_clock_mut(&mut self) -> &mut WorldClock {
        &mut self.world_clock
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn sync_peers(&mut self) {
        let current: BTreeSet<ConnectionId> = self.transport.connections().into_iter().collect();
        let gone: Vec<ConnectionId> = self.peers.difference(&current).copied().collect();
        for connection in gone {
            self.on_peer_disconnected(connection);
        }
        let new: Vec<ConnectionId> = current.difference(&self.peers).copied().collect();
        for connection in new {
            self.on_peer_connected(connection);
        }
    }

    /// Returns `true` when a client state frame was applied.
    fn dispatch(&mut self, message: Inbound) -> bool {
        match message.tag {
            tags::CLIENT_ENTITY_STATE => self.on_client_state(message.connection, message.payload),
            tags::CLIENT_READY => {
                match decode_json::<ClientReady>(&message.payload) {
                    Ok(ready) => self.on_client_ready(message.connection, ready),
                    Err(e) => error!("Bad client-ready from {}: {}", message.connection, e),
                }
                false
            }
            other => {
                debug!("Ignoring message tag {} from {}", other, message.connection);
                false
            }
        }
    }

    fn on_client_state(&mut self, sender: ConnectionId, payload: Bytes) -> bool {
        let frame = match EntityStateFrame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Discarding client state from {}: {}", sender, e);
                self.stats.desync_drops += 1;
                return false;
            }
        };
        let outcome = apply_client_state(
            &self.registry,
            &mut self.recency,
            sender,
            &frame,
            &mut self.stats,
        );
        if outcome == ApplyOutcome::Applied {
            self.scheduler.request_physics_sync();
            return true;
        }
        false
    }

    fn on_client_ready(&mut self, connection: ConnectionId, ready: ClientReady) {
        let current = self.map_info.as_ref().map(|m| m.map_id.as_str());
        match ready.map_id {
            Some(map_id) if Some(map_id.as_str()) != current => {
                debug!(
                    "Holding client-ready from {} for map '{}' until it is current",
                    connection, map_id
                );
                self.early_ready.insert(connection, map_id);
            }
            _ => {
                self.early_ready.remove(&connection);
                self.queue_ready(connection);
            }
        }
    }

    fn queue_ready(&mut self, connection: ConnectionId) {
        if self.admitted.contains(&connection) || self.pending_ready.contains(&connection) {
            return;
        }
        self.pending_ready.push_back(connection);
    }

    fn resume_spawn(&mut self) -> Option<SpawnPoll> {
        let task = self.spawn.as_mut()?;
        let mut env = SpawnEnv {
            scene_generation: self.scene_generation,
            now: self.clock.elapsed(),
            gate: &mut self.gate,
            admission: &mut self.admission,
            components: &mut self.components[..],
            registry: &mut self.registry,
            factory: self.factory.as_mut(),
            observer: self.observer.as_mut(),
            stats: &mut self.stats,
        };
        let poll = task.resume(&mut env);
        match poll {
            SpawnPoll::Pending => {}
            SpawnPoll::Complete => {
                self.spawn = None;
            }
            SpawnPoll::Abandoned => {
                warn!("Spawn task dropped for stale scene");
                self.spawn = None;
            }
        }
        Some(poll)
    }

    fn admit_pending(&mut self) -> Vec<ConnectionId> {
        if !self.admission.is_open() || self.pending_ready.is_empty() {
            return Vec::new();
        }
        let mut admitted = Vec::with_capacity(self.pending_ready.len());
        while let Some(connection) = self.pending_ready.pop_front() {
            if !self.admitted.insert(connection) {
                continue;
            }
            for component in self.components.iter_mut() {
                component.on_player_admitted(connection);
            }
            info!("Admitted player {}", connection);
            admitted.push(connection);
        }
        admitted
    }

    fn broadcast_presence(&mut self) {
        let online: Vec<ConnectionId> = self.peers.iter().copied().collect();
        for component in self.components.iter_mut() {
            component.on_presence_tick(&online);
        }
        let presence = Presence {
            online: online.len() as u32,
        };
        send_json(
            self.transport.as_mut(),
            SendTarget::All,
            tags::PRESENCE,
            &presence,
        );
    }
}
