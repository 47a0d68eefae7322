//! Entities as seen by the sync core.
//!
//! The core never owns entity business state. It only needs the capability
//! surface below: identity, ownership, an enabled flag, the per-tick hooks and
//! the two state-channel codecs. Interpolation and extrapolation are left to
//! each implementation.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SyncResult;
use crate::types::{ConnectionId, EntityId, Side, Timestamp};

/// Who receives an entity's server-state frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connection.
    All,
    /// Only the owning connection (no-op for unowned entities).
    Owner,
    /// An explicit interest set maintained by the entity.
    Only(Vec<ConnectionId>),
}

pub trait SyncEntity: Send {
    fn id(&self) -> EntityId;

    /// Owning connection; `None` for server-simulated entities.
    fn owner(&self) -> Option<ConnectionId>;

    /// Disabled entities stay registered but are skipped by every pass.
    fn is_enabled(&self) -> bool {
        true
    }

    fn update(&mut self, _ctx: &mut TickContext<'_>) {}

    fn late_update(&mut self, _ctx: &mut TickContext<'_>) {}

    fn audience(&self) -> Audience {
        Audience::All
    }

    /// Append server-authoritative state to `out`. Return `false` to send
    /// nothing this tick.
    fn write_server_state(&mut self, _timestamp: Timestamp, _out: &mut BytesMut) -> bool {
        false
    }

    fn read_server_state(&mut self, _timestamp: Timestamp, _payload: &[u8]) -> SyncResult<()> {
        Ok(())
    }

    /// Append client-authoritative state (typically movement) to `out`.
    fn write_client_state(&mut self, _timestamp: Timestamp, _out: &mut BytesMut) -> bool {
        false
    }

    fn read_client_state(&mut self, _timestamp: Timestamp, _payload: &[u8]) -> SyncResult<()> {
        Ok(())
    }
}

/// Registry membership handle. Cloning shares the same entity.
pub type SharedEntity = Arc<Mutex<dyn SyncEntity>>;

pub fn shared<E: SyncEntity + 'static>(entity: E) -> SharedEntity {
    Arc::new(Mutex::new(entity))
}

// ---------------------------------------------------------------------------
// Tick context
// ---------------------------------------------------------------------------

/// Membership change requested from inside a tick pass.
///
/// Applied by the scheduler once both passes finish, so the dense array is
/// never mutated while it is being walked.
pub enum Command {
    Register(SharedEntity),
    Unregister(EntityId),
}

/// Physics transform flush requested by an entity that moved itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicsSyncFlags {
    pub sync_3d: bool,
    pub sync_2d: bool,
}

impl PhysicsSyncFlags {
    pub fn any(&self) -> bool {
        self.sync_3d || self.sync_2d
    }

    pub fn take(&mut self) -> PhysicsSyncFlags {
        std::mem::take(self)
    }
}

/// Mutable context handed to each entity hook.
pub struct TickContext<'a> {
    pub side: Side,
    pub dt: Duration,
    pub timestamp: Timestamp,
    pub(crate) commands: &'a mut Vec<Command>,
    pub(crate) physics: &'a mut PhysicsSyncFlags,
}

impl<'a> TickContext<'a> {
    pub fn new(
        side: Side,
        dt: Duration,
        timestamp: Timestamp,
        commands: &'a mut Vec<Command>,
        physics: &'a mut PhysicsSyncFlags,
    ) -> Self {
        Self {
            side,
            dt,
            timestamp,
            commands,
            physics,
        }
    }

    pub fn spawn(&mut self, entity: SharedEntity) {
        self.commands.push(Command::Register(entity));
    }

    pub fn despawn(&mut self, id: EntityId) {
        self.commands.push(Command::Unregister(id));
    }

    pub fn request_physics_sync(&mut self) {
        self.physics.sync_3d = true;
    }

    pub fn request_physics_sync_2d(&mut self) {
        self.physics.sync_2d = true;
    }
}
