//! Per-frame tick machinery shared by the server and client roles.
//!
//! A role's tick runs, in order:
//!
//! 1. drain inbound messages,
//! 2. count down periodic timers and fire the expired ones,
//! 3. flush pending physics transform syncs (at most once),
//! 4. update pass, then late-update pass over the registry's dense array,
//! 5. outbound state pass.
//!
//! The orchestrators ([`ServerWorld`](crate::server::ServerWorld),
//! [`ClientWorld`](crate::client::ClientWorld)) own steps 1, 2 and 5; this
//! module provides the timers and steps 3–4.

use log::debug;
use std::time::Duration;

use crate::entity::{Command, PhysicsSyncFlags, TickContext};
use crate::registry::EntityRegistry;
use crate::types::{EntityId, Side, Timestamp};

// ---------------------------------------------------------------------------
// Periodic timer
// ---------------------------------------------------------------------------

/// Countdown that fires when it reaches zero and then restarts at its
/// interval. Overshoot is not carried into the next period.
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    interval: Duration,
    remaining: Duration,
}

impl PeriodicTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            remaining: interval,
        }
    }

    pub fn from_secs(secs: f32) -> Self {
        Self::new(Duration::from_secs_f32(secs.max(0.0)))
    }

    pub fn tick(&mut self, dt: Duration) -> bool {
        self.remaining = self.remaining.saturating_sub(dt);
        if self.remaining.is_zero() {
            self.remaining = self.interval;
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.remaining = self.interval;
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }
}

// ---------------------------------------------------------------------------
// Physics collaborator
// ---------------------------------------------------------------------------

/// Pushes manually changed transforms into the physics scene.
pub trait PhysicsSync: Send {
    fn sync_transforms(&mut self, flags: PhysicsSyncFlags);
}

/// For processes without a physics scene.
#[derive(Debug, Default)]
pub struct NoPhysics;

impl PhysicsSync for NoPhysics {
    fn sync_transforms(&mut self, _flags: PhysicsSyncFlags) {}
}

// ---------------------------------------------------------------------------
// Entity passes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub updated: usize,
    pub late_updated: usize,
    pub registered: usize,
    pub unregistered: usize,
}

pub struct TickScheduler {
    side: Side,
    physics: Box<dyn PhysicsSync>,
    physics_flags: PhysicsSyncFlags,
    commands: Vec<Command>,
    despawned: Vec<EntityId>,
    physics_flushes: u64,
}

impl TickScheduler {
    pub fn new(side: Side) -> Self {
        Self::with_physics(side, Box::new(NoPhysics))
    }

    pub fn with_physics(side: Side, physics: Box<dyn PhysicsSync>) -> Self {
        Self {
            side,
            physics,
            physics_flags: PhysicsSyncFlags::default(),
            commands: Vec::new(),
            despawned: Vec::new(),
            physics_flushes: 0,
        }
    }

    /// Request a transform flush outside an entity pass (e.g. while applying
    /// an inbound state frame).
    pub fn request_physics_sync(&mut self) {
        self.physics_flags.sync_3d = true;
    }

    /// Flush pending transform syncs, however many entities asked.
    pub fn flush_physics(&mut self) -> bool {
        if !self.physics_flags.any() {
            return false;
        }
        let flags = self.physics_flags.take();
        self.physics.sync_transforms(flags);
        self.physics_flushes += 1;
        true
    }

    pub fn physics_flushes(&self) -> u64 {
        self.physics_flushes
    }

    /// Update pass, late-update pass, then deferred membership changes.
    pub fn run_entity_passes(
        &mut self,
        registry: &mut EntityRegistry,
        dt: Duration,
        timestamp: Timestamp,
    ) -> PassReport {
        let mut report = PassReport::default();
        self.despawned.clear();
        {
            let mut ctx = TickContext::new(
                self.side,
                dt,
                timestamp,
                &mut self.commands,
                &mut self.physics_flags,
            );
            for entity in registry.dense() {
                let mut e = entity.lock();
                if !e.is_enabled() {
                    continue;
                }
                e.update(&mut ctx);
                report.updated += 1;
            }
            for entity in registry.dense() {
                let mut e = entity.lock();
                if !e.is_enabled() {
                    continue;
                }
                e.late_update(&mut ctx);
                report.late_updated += 1;
            }
        }

        for command in self.commands.drain(..) {
            match command {
                Command::Register(entity) => {
                    if registry.register(entity) {
                        report.registered += 1;
                    }
                }
                Command::Unregister(id) => {
                    if registry.unregister(id).is_some() {
                        self.despawned.push(id);
                        report.unregistered += 1;
                    }
                }
            }
        }
        if report.registered + report.unregistered > 0 {
            debug!(
                "{} tick membership: +{} -{}",
                self.side, report.registered, report.unregistered
            );
        }
        report
    }

    /// Ids removed by deferred commands during the last
    /// [`run_entity_passes`](Self::run_entity_passes).
    pub fn despawned(&self) -> &[EntityId] {
        &self.despawned
    }
}
