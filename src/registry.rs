//! Entity registry: membership set plus a dense iteration array.
//!
//! The set is an index map from [`EntityId`] to its slot in `dense`. Removal
//! swaps the last slot into the hole, so the array stays gap-free without a
//! full rebuild. `Vec` keeps its capacity across removals, which gives the
//! "logical length shrinks, backing storage does not" behaviour for free.

use log::trace;
use std::collections::HashMap;

use crate::entity::SharedEntity;
use crate::types::EntityId;

pub struct EntityRegistry {
    slots: HashMap<EntityId, usize>,
    dense: Vec<SharedEntity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity(capacity),
            dense: Vec::with_capacity(capacity),
        }
    }

    /// Track `entity`. Returns `false` (and changes nothing) if its id is
    /// already tracked.
    pub fn register(&mut self, entity: SharedEntity) -> bool {
        let id = entity.lock().id();
        if self.slots.contains_key(&id) {
            return false;
        }
        self.slots.insert(id, self.dense.len());
        self.dense.push(entity);
        trace!("registered entity {} (count={})", id, self.dense.len());
        true
    }

    /// Stop tracking `id`. Returns the removed handle, `None` if absent.
    pub fn unregister(&mut self, id: EntityId) -> Option<SharedEntity> {
        let slot = self.slots.remove(&id)?;
        let removed = self.dense.swap_remove(slot);
        if let Some(moved) = self.dense.get(slot) {
            let moved_id = moved.lock().id();
            self.slots.insert(moved_id, slot);
        }
        trace!("unregistered entity {} (count={})", id, self.dense.len());
        Some(removed)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&SharedEntity> {
        self.slots.get(&id).map(|&slot| &self.dense[slot])
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Backing storage size; never shrinks on unregister.
    pub fn capacity(&self) -> usize {
        self.dense.capacity()
    }

    /// The live dense array for the tick path.
    ///
    /// Treat any reference obtained here as invalidated by the next
    /// `register`/`unregister`.
    pub fn dense(&self) -> &[SharedEntity] {
        &self.dense
    }

    /// Copy the current membership into `buffer` (cleared first). Reuses the
    /// buffer's allocation, so steady-state callers do not allocate.
    pub fn snapshot_into(&self, buffer: &mut Vec<SharedEntity>) {
        buffer.clear();
        buffer.extend(self.dense.iter().cloned());
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.keys().copied()
    }

    /// Drop every entity, keeping capacity for the next scene.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.dense.clear();
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
