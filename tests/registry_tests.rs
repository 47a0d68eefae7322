//! EntityRegistry tests

mod common;

#[cfg(test)]
mod tests {
    use super::common::{entity, TestEntity};
    use realm_sync::{
        entity::{shared, SharedEntity},
        registry::EntityRegistry,
        scheduler::TickScheduler,
        types::{EntityId, Side},
    };
    use std::collections::HashSet;
    use std::time::Duration;

    fn ids(buffer: &[SharedEntity]) -> HashSet<u32> {
        buffer.iter().map(|e| e.lock().id().0).collect()
    }

    fn assert_consistent(registry: &EntityRegistry) {
        let dense = registry.dense();
        assert_eq!(dense.len(), registry.len());
        let unique = ids(dense);
        assert_eq!(unique.len(), dense.len(), "duplicate entries in dense array");
        for id in registry.ids() {
            let handle = registry.get(id).expect("tracked id resolves");
            assert_eq!(handle.lock().id(), id);
        }
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    #[test]
    fn register_is_idempotent() {
        let mut registry = EntityRegistry::new();
        let (a, _) = entity(1);

        assert!(registry.register(a.clone()));
        assert!(!registry.register(a));
        assert_eq!(registry.len(), 1);

        // A second handle with the same id is also ignored.
        assert!(!registry.register(shared(TestEntity::new(1))));
        assert_eq!(registry.len(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn unregister_absent_is_noop() {
        let mut registry = EntityRegistry::new();
        assert!(registry.unregister(EntityId(42)).is_none());

        let (a, _) = entity(1);
        registry.register(a);
        assert!(registry.unregister(EntityId(1)).is_some());
        assert!(registry.unregister(EntityId(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_middle_keeps_array_dense() {
        let mut registry = EntityRegistry::new();
        for id in 1..=5 {
            registry.register(entity(id).0);
        }
        registry.unregister(EntityId(2));
        registry.unregister(EntityId(4));

        assert_eq!(registry.len(), 3);
        assert_eq!(ids(registry.dense()), HashSet::from([1, 3, 5]));
        assert_consistent(&registry);
    }

    #[test]
    fn mixed_sequence_stays_consistent() {
        let mut registry = EntityRegistry::new();
        // Deterministic pseudo-random add/remove sequence.
        let mut seed = 7u32;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let id = (seed >> 16) % 32;
            if seed & 1 == 0 {
                registry.register(entity(id).0);
            } else {
                registry.unregister(EntityId(id));
            }
            assert_consistent(&registry);
        }
    }

    #[test]
    fn capacity_survives_removal() {
        let mut registry = EntityRegistry::new();
        for id in 0..64 {
            registry.register(entity(id).0);
        }
        let capacity = registry.capacity();
        for id in 0..64 {
            registry.unregister(EntityId(id));
        }
        assert!(registry.is_empty());
        assert_eq!(registry.capacity(), capacity);
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_reuses_buffer() {
        let mut registry = EntityRegistry::new();
        for id in 1..=3 {
            registry.register(entity(id).0);
        }
        let mut buffer = Vec::with_capacity(16);
        registry.snapshot_into(&mut buffer);
        let capacity = buffer.capacity();

        registry.unregister(EntityId(3));
        registry.snapshot_into(&mut buffer);
        assert_eq!(ids(&buffer), HashSet::from([1, 2]));
        assert_eq!(buffer.capacity(), capacity);
    }

    #[test]
    fn snapshot_is_independent_of_later_changes() {
        let mut registry = EntityRegistry::new();
        registry.register(entity(1).0);
        let mut buffer = Vec::new();
        registry.snapshot_into(&mut buffer);

        registry.register(entity(2).0);
        registry.unregister(EntityId(1));
        assert_eq!(ids(&buffer), HashSet::from([1]));
    }

    // -----------------------------------------------------------------------
    // End-to-end: register, snapshot, unregister, tick
    // -----------------------------------------------------------------------

    #[test]
    fn register_snapshot_unregister_then_tick() {
        let mut registry = EntityRegistry::new();
        assert!(registry.is_empty());

        let (a, pa) = entity(1);
        let (b, pb) = entity(2);
        let (c, pc) = entity(3);
        registry.register(a);
        registry.register(b);
        registry.register(c);

        let mut buffer = Vec::new();
        registry.snapshot_into(&mut buffer);
        assert_eq!(ids(&buffer), HashSet::from([1, 2, 3]));

        registry.unregister(EntityId(2));
        registry.snapshot_into(&mut buffer);
        assert_eq!(ids(&buffer), HashSet::from([1, 3]));

        let mut scheduler = TickScheduler::new(Side::Server);
        let report = scheduler.run_entity_passes(&mut registry, Duration::from_millis(33), 33);
        assert_eq!(report.updated, 2);
        assert_eq!(report.late_updated, 2);
        assert_eq!(pa.lock().updates, 1);
        assert_eq!(pb.lock().updates, 0);
        assert_eq!(pc.lock().updates, 1);
    }

    #[test]
    fn clear_empties_registry() {
        let mut registry = EntityRegistry::with_capacity(8);
        registry.register(entity(1).0);
        registry.register(entity(2).0);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains(EntityId(1)));
        assert!(registry.register(entity(1).0));
    }
}
