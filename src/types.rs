//! Core types shared across all modules.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

// ---------------------------------------------------------------------------
// Identifiers & time
// ---------------------------------------------------------------------------

/// Network-wide entity identifier (fixed-width on the wire).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport connection identifier.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ConnectionId(pub i64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Sender-local monotonic counter carried by every state frame.
///
/// Signed so higher-level clock sync can apply negative offsets.
pub type Timestamp = i64;

/// Which end of the link a piece of state belongs to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Server,
    Client,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Server => write!(f, "server"),
            Side::Client => write!(f, "client"),
        }
    }
}

/// Monotonic session time, advanced by the frame driver.
///
/// Everything time-based in the core (readiness delay, timers, state
/// timestamps) reads this instead of the wall clock so a session can be
/// replayed deterministically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionClock {
    elapsed: Duration,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, dt: Duration) {
        self.elapsed += dt;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Milliseconds since session start, used as the outbound state timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.elapsed.as_millis() as Timestamp
    }
}

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldStats {
    /// Entities currently tracked by the registry.
    pub registered: usize,
    pub total_ticks: u64,
    /// State frames rejected because their timestamp did not advance.
    pub stale_drops: u64,
    /// Client state frames rejected because the sender is not the owner.
    pub authority_drops: u64,
    /// State frames addressed to an entity id nobody tracks.
    pub unknown_entity_drops: u64,
    /// Frames discarded because their declared type did not match.
    pub desync_drops: u64,
    /// Entities instantiated by the staged spawner this scene.
    pub spawned: u64,
    /// Placements skipped because of missing content.
    pub skipped: u64,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Runtime configuration shared by server and client roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Frame driver rate in Hz.
    pub tick_rate_hz: f32,
    /// Seconds between presence broadcasts.
    pub presence_interval_secs: f32,
    /// Seconds between world-clock broadcasts.
    pub world_clock_interval_secs: f32,
    /// Minimum seconds after scene load before objects may be instantiated.
    pub instantiate_delay_secs: f32,
    /// Real seconds per in-world day.
    pub day_length_secs: f32,
    /// No display surface is attached to this process.
    pub headless: bool,
    /// Prefab reference for the non-player observer spawned on headless servers.
    pub observer_prefab: Option<String>,
    /// This process runs the server and a local client at once.
    pub is_host: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30.0,
            presence_interval_secs: 1.0,
            world_clock_interval_secs: 5.0,
            instantiate_delay_secs: 0.5,
            day_length_secs: 1440.0,
            headless: false,
            observer_prefab: None,
            is_host: false,
        }
    }
}

impl SyncConfig {
    /// Load from an optional TOML file layered under `REALM_*` environment
    /// variables. Missing keys fall back to [`SyncConfig::default`].
    pub fn load(path: Option<&Path>) -> SyncResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix("REALM"))
            .build()
            .and_then(|c| c.try_deserialize::<SyncConfig>())
            .map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn with_tick_rate_hz(mut self, hz: f32) -> Self {
        self.tick_rate_hz = hz;
        self
    }

    pub fn with_instantiate_delay(mut self, secs: f32) -> Self {
        self.instantiate_delay_secs = secs;
        self
    }

    pub fn with_presence_interval(mut self, secs: f32) -> Self {
        self.presence_interval_secs = secs;
        self
    }

    pub fn with_world_clock_interval(mut self, secs: f32) -> Self {
        self.world_clock_interval_secs = secs;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_observer_prefab(mut self, prefab: impl Into<String>) -> Self {
        self.observer_prefab = Some(prefab.into());
        self
    }

    pub fn with_host(mut self, is_host: bool) -> Self {
        self.is_host = is_host;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_rate_hz.max(1.0))
    }

    pub fn instantiate_delay(&self) -> Duration {
        Duration::from_secs_f32(self.instantiate_delay_secs.max(0.0))
    }
}
