//! ClientWorld – client-role orchestrator.
//!
//! Mirrors [`ServerWorld`](crate::server::ServerWorld) for one connected
//! client: applies server state, tracks map info and the world clock, sends
//! the ready handshake once per scene and streams the state of owned entities
//! back to the server.

use bytes::Bytes;
use log::{debug, error, info};
use std::collections::HashMap;
use std::time::Duration;

use crate::component::ManagerComponent;
use crate::entity::SharedEntity;
use crate::protocol::{
    decode_json, tags, ClientReady, EntityStateFrame, MapInfo, Presence, WorldClockUpdate,
};
use crate::readiness::ReadinessGate;
use crate::registry::EntityRegistry;
use crate::scheduler::{PassReport, PhysicsSync, TickScheduler};
use crate::sync::{apply_server_state, ApplyOutcome, RecencyTable, StateWriter};
use crate::transport::{send_json, Inbound, SendTarget, Transport};
use crate::types::{ConnectionId, EntityId, SessionClock, Side, SyncConfig, Timestamp, WorldStats};
use crate::world_clock::WorldClock;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientTickReport {
    pub tick: u64,
    pub timestamp: Timestamp,
    pub inbound: usize,
    /// Server state frames that were applied.
    pub applied: usize,
    pub ready_sent: bool,
    pub physics_flushed: bool,
    pub passes: PassReport,
    /// Client state frames produced.
    pub states_sent: usize,
}

pub struct ClientWorld {
    config: SyncConfig,
    clock: SessionClock,
    local: ConnectionId,
    registry: EntityRegistry,
    gate: ReadinessGate,
    scheduler: TickScheduler,
    recency: RecencyTable,
    writer: StateWriter,
    world_clock: WorldClock,
    /// map id → expected type name.
    known_maps: HashMap<String, String>,
    map_info: Option<MapInfo>,
    scene: Option<String>,
    ready_sent: bool,
    online: u32,
    components: Vec<Box<dyn ManagerComponent>>,
    transport: Box<dyn Transport>,
    inbound: Vec<Inbound>,
    stats: WorldStats,
    tick_count: u64,
    running: bool,
}

impl ClientWorld {
    pub fn new(config: SyncConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            gate: ReadinessGate::new(Side::Client, config.instantiate_delay()),
            world_clock: WorldClock::new(config.day_length_secs, 0.0),
            local: transport.local_connection(),
            config,
            clock: SessionClock::new(),
            registry: EntityRegistry::new(),
            scheduler: TickScheduler::new(Side::Client),
            recency: RecencyTable::new(),
            writer: StateWriter::new(),
            known_maps: HashMap::new(),
            map_info: None,
            scene: None,
            ready_sent: false,
            online: 0,
            components: Vec::new(),
            transport,
            inbound: Vec::new(),
            stats: WorldStats::default(),
            tick_count: 0,
            running: false,
        }
    }

    pub fn add_component(&mut self, component: Box<dyn ManagerComponent>) {
        debug!("Registered manager component '{}'", component.name());
        self.components.push(component);
    }

    pub fn set_physics(&mut self, physics: Box<dyn PhysicsSync>) {
        self.scheduler = TickScheduler::with_physics(Side::Client, physics);
    }

    /// Add a map to the local catalog so incoming map info can be type-checked.
    pub fn register_known_map(&mut self, map_id: impl Into<String>, type_name: impl Into<String>) {
        self.known_maps.insert(map_id.into(), type_name.into());
    }

    pub fn local_connection(&self) -> ConnectionId {
        self.local
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn on_start_client(&mut self) {
        info!("Client {} started", self.local);
        self.running = true;
        for component in self.components.iter_mut() {
            component.on_start_client();
        }
    }

    pub fn on_stop_client(&mut self) {
        for component in self.components.iter_mut() {
            component.on_stop_client();
        }
        self.clean();
        self.running = false;
        info!("Client {} stopped", self.local);
    }

    pub fn clean(&mut self) {
        self.map_info = None;
        self.scene = None;
        self.ready_sent = false;
        self.online = 0;
        self.gate.reset();
        self.registry.clear();
        self.recency.clear();
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

    pub fn client_scene_change(&mut self) {
        self.scene = None;
        self.ready_sent = false;
        self.gate.reset();
        self.registry.clear();
        self.recency.clear();
        debug!("Client {} scene change", self.local);
    }

    pub fn on_client_scene_loaded(&mut self, scene: &str) {
        self.gate.on_scene_loaded(self.clock.elapsed());
        self.scene = Some(scene.to_string());
        self.ready_sent = false;
        for component in self.components.iter_mut() {
            component.on_client_scene_loaded(scene);
        }
        info!("Client scene '{}' loaded", scene);
    }

    pub fn map_info(&self) -> Option<&MapInfo> {
        self.map_info.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_latched()
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn online(&self) -> u32 {
        self.online
    }

    pub fn world_clock(&self) -> &WorldClock {
        &self.world_clock
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
    // Main tick
    // -----------------------------------------------------------------------

    pub fn on_client_tick(&mut self, dt: Duration) -> ClientTickReport {
        self.clock.advance(dt);
        self.tick_count += 1;
        let timestamp = self.clock.timestamp();
        let mut report = ClientTickReport {
            tick: self.tick_count,
            timestamp,
            ..Default::default()
        };

        let mut inbound = std::mem::take(&mut self.inbound);
        self.transport.drain_inbound(&mut inbound);
        report.inbound = inbound.len();
        for message in inbound.drain(..) {
            if self.dispatch(message) {
                report.applied += 1;
            }
        }
        self.inbound = inbound;

        self.world_clock.advance(dt);
        report.ready_sent = self.poll_ready();

        report.physics_flushed = self.scheduler.flush_physics();

        report.passes = self
            .scheduler
            .run_entity_passes(&mut self.registry, dt, timestamp);
        for &id in self.scheduler.despawned() {
            self.recency.forget(id);
        }

        // The host's server instance already owns the authoritative copy.
        if !self.config.is_host {
            report.states_sent = self.writer.send_client_states(
                &self.registry,
                self.local,
                timestamp,
                self.transport.as_mut(),
            );
        }

        self.stats.total_ticks = self.tick_count;
        self.stats.registered = self.registry.len();
        report
    }

    pub fn stats(&self) -> WorldStats {
        let mut stats = self.stats.clone();
        stats.registered = self.registry.len();
        stats
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, message: Inbound) -> bool {
        match message.tag {
            tags::SERVER_ENTITY_STATE => return self.on_server_state(message.payload),
            tags::MAP_INFO => match decode_json::<MapInfo>(&message.payload) {
                Ok(info) => self.on_map_info(info),
                Err(e) => error!("Bad map info: {}", e),
            },
            tags::WORLD_CLOCK => match decode_json::<WorldClockUpdate>(&message.payload) {
                Ok(update) if !self.config.is_host => self.world_clock.set(update.time_of_day),
                Ok(_) => {}
                Err(e) => error!("Bad world clock update: {}", e),
            },
            tags::PRESENCE => match decode_json::<Presence>(&message.payload) {
                Ok(presence) => self.online = presence.online,
                Err(e) => error!("Bad presence update: {}", e),
            },
            other => debug!("Ignoring message tag {}", other),
        }
        false
    }

    fn on_server_state(&mut self, payload: Bytes) -> bool {
        let frame = match EntityStateFrame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Discarding server state: {}", e);
                self.stats.desync_drops += 1;
                return false;
            }
        };
        let outcome = apply_server_state(&self.registry, &mut self.recency, &frame, &mut self.stats);
        if outcome == ApplyOutcome::Applied {
            self.scheduler.request_physics_sync();
            return true;
        }
        false
    }

    fn on_map_info(&mut self, info: MapInfo) {
        match self.known_maps.get(&info.map_id) {
            None => {
                error!(
                    "Unknown map '{}', creating a default record",
                    info.map_id
                );
                self.known_maps
                    .insert(info.map_id.clone(), info.type_name.clone());
            }
            Some(expected) if *expected != info.type_name => {
                error!(
                    "Map '{}' type mismatch: expected {}, got {}",
                    info.map_id, expected, info.type_name
                );
                self.stats.desync_drops += 1;
                return;
            }
            Some(_) => {}
        }
        for component in self.components.iter_mut() {
            if let Some(extra) = info.extras.get(component.name()) {
                component.read_map_info_extra(extra);
            }
        }
        debug!("Map info for '{}' applied", info.map_id);
        self.map_info = Some(info);
    }

    /// Poll the client gate and send the ready handshake once it latches.
    fn poll_ready(&mut self) -> bool {
        if self.ready_sent || self.scene.is_none() {
            return false;
        }
        if !self.gate.poll(self.clock.elapsed(), &mut self.components[..]) {
            return false;
        }
        let ready = ClientReady {
            map_id: self.map_info.as_ref().map(|m| m.map_id.clone()),
        };
        send_json(
            self.transport.as_mut(),
            SendTarget::Server,
            tags::CLIENT_READY,
            &ready,
        );
        self.ready_sent = true;
        info!("Client {} ready", self.local);
        true
    }
}
