//! Realm Sync
//!
//! Authoritative entity synchronization runtime: an entity registry ticked
//! once per frame, readiness gating after scene loads, a staged world spawner
//! and timestamp-ordered state replication between a server and its clients.
//!
//! ## Architecture
//!
//! ```text
//! WorldRuntime  (runtime.rs)          ← tokio frame driver (server feature)
//!   └── ServerWorld  (server.rs)      ← on_server_tick
//!         ├── EntityRegistry  (registry.rs)
//!         ├── ReadinessGate + AdmissionLatch  (readiness.rs)
//!         ├── SpawnTask  (spawner.rs)  ← SceneContent, EntityFactory
//!         ├── RecencyTable + StateWriter  (sync.rs)
//!         ├── TickScheduler  (scheduler.rs)
//!         └── Transport  (transport.rs)
//!
//! ClientWorld  (client.rs)            ← on_client_tick, same building blocks
//! ```
//!
//! Everything below the runtime is synchronous and single-threaded: the host
//! application owns the frame loop and calls one tick method per frame.

pub mod client;
pub mod component;
pub mod entity;
pub mod error;
pub mod protocol;
pub mod readiness;
pub mod registry;
pub mod scene;
pub mod scheduler;
pub mod server;
pub mod spawner;
pub mod sync;
pub mod transport;
pub mod types;
pub mod world_clock;

// Async driver requires the `server` feature.
#[cfg(feature = "server")]
pub mod runtime;

pub use client::ClientWorld;
pub use component::ManagerComponent;
pub use entity::{shared, SharedEntity, SyncEntity, TickContext};
pub use error::{SyncError, SyncResult};
pub use readiness::{AdmissionLatch, ReadinessGate, ReadinessStates, MIN_DELAY_CHECK};
pub use registry::EntityRegistry;
#[cfg(feature = "server")]
pub use runtime::WorldRuntime;
pub use server::ServerWorld;
pub use spawner::{EntityFactory, SceneContent, SpawnCategory, SpawnObserver, SpawnTask};
pub use types::{ConnectionId, EntityId, SyncConfig, Timestamp, Vec3, WorldStats};
