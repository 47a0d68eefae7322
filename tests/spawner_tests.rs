//! Staged spawner tests

mod common;

#[cfg(test)]
mod tests {
    use super::common::{FlagComponent, RecordingObserver, ScriptedScene, TestFactory};
    use realm_sync::{
        component::ManagerComponent,
        error::SyncError,
        readiness::{AdmissionLatch, ReadinessGate},
        registry::EntityRegistry,
        spawner::{
            Placement, SpawnCategory, SpawnEnv, SpawnOptions, SpawnPlan, SpawnPoll, SpawnStage,
            SpawnTask,
        },
        types::{EntityId, Side, Vec3, WorldStats},
    };
    use std::time::Duration;

    struct Harness {
        generation: u64,
        now: Duration,
        gate: ReadinessGate,
        admission: AdmissionLatch,
        components: Vec<Box<dyn ManagerComponent>>,
        registry: EntityRegistry,
        factory: TestFactory,
        observer: RecordingObserver,
        stats: WorldStats,
    }

    impl Harness {
        fn new() -> Self {
            let mut gate = ReadinessGate::new(Side::Server, Duration::ZERO);
            gate.on_scene_loaded(Duration::ZERO);
            Self {
                generation: 1,
                now: Duration::ZERO,
                gate,
                admission: AdmissionLatch::new(),
                components: Vec::new(),
                registry: EntityRegistry::new(),
                factory: TestFactory::new(),
                observer: RecordingObserver::default(),
                stats: WorldStats::default(),
            }
        }

        fn resume(&mut self, task: &mut SpawnTask) -> SpawnPoll {
            let mut env = SpawnEnv {
                scene_generation: self.generation,
                now: self.now,
                gate: &mut self.gate,
                admission: &mut self.admission,
                components: &mut self.components,
                registry: &mut self.registry,
                factory: &mut self.factory,
                observer: &mut self.observer,
                stats: &mut self.stats,
            };
            task.resume(&mut env)
        }

        /// Resume until the task stops being pending; returns (final poll, resumes).
        fn run(&mut self, task: &mut SpawnTask) -> (SpawnPoll, usize) {
            for n in 1..10_000 {
                let poll = self.resume(task);
                if poll != SpawnPoll::Pending {
                    return (poll, n);
                }
            }
            panic!("spawn task never finished");
        }
    }

    fn task(scene: ScriptedScene) -> SpawnTask {
        SpawnTask::new(1, Box::new(scene), SpawnOptions::default())
    }

    // -----------------------------------------------------------------------
    // Plan
    // -----------------------------------------------------------------------

    #[test]
    fn plan_rejects_weights_not_summing_to_one() {
        let stages = vec![
            SpawnStage {
                category: SpawnCategory::Npcs,
                placements: Vec::new(),
                weight: 0.5,
            },
            SpawnStage {
                category: SpawnCategory::Monsters,
                placements: Vec::new(),
                weight: 0.25,
            },
        ];
        assert!(matches!(
            SpawnPlan::new(stages),
            Err(SyncError::InvalidSpawnWeights(_))
        ));
    }

    #[test]
    fn default_plan_follows_category_order() {
        let scene = ScriptedScene::uniform("s", 1);
        let plan = SpawnPlan::from_content(&scene);
        let order: Vec<_> = plan.stages().iter().map(|s| s.category).collect();
        assert_eq!(order, SpawnCategory::ORDER.to_vec());
        let total: f32 = plan.stages().iter().map(|s| s.weight).sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(plan.total_placements(), 5);
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    #[test]
    fn progress_is_monotonic_and_ends_at_one_once() {
        let mut h = Harness::new();
        let mut t = task(ScriptedScene::uniform("forest", 3));
        let (poll, _) = h.run(&mut t);
        assert_eq!(poll, SpawnPoll::Complete);

        let log = h.observer.log.lock();
        assert!(log.fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(log.fractions.iter().filter(|f| **f == 1.0).count(), 1);
        assert_eq!(log.fractions.last().copied(), Some(1.0));
        assert_eq!(log.starts, 1);
        assert_eq!(log.finishes, 1);
    }

    #[test]
    fn first_item_reports_stage_base() {
        let mut h = Harness::new();
        let mut t = task(ScriptedScene::uniform("forest", 2));
        h.run(&mut t);

        let log = h.observer.log.lock();
        let expected = [
            0.0, 0.125, 0.25, // warp portals
            0.25, 0.375, 0.5, // npcs
            0.5, 0.625, 0.75, // monsters
            0.75, 0.8125, 0.875, // harvestables
            0.875, 0.9375, 1.0, // item drops
        ];
        assert_eq!(log.fractions, expected);
    }

    #[test]
    fn yields_after_every_item() {
        let mut h = Harness::new();
        let mut t = task(ScriptedScene::uniform("forest", 2));
        let (_, resumes) = h.run(&mut t);
        // await + register + 5 × (2 items + stage end) + observer + finish + post-spawn
        assert_eq!(resumes, 1 + 1 + 15 + 3);
        assert_eq!(h.stats.spawned, 10);
        assert_eq!(h.registry.len(), 10);
    }

    #[test]
    fn empty_scene_still_reaches_one() {
        let mut h = Harness::new();
        let mut t = task(ScriptedScene::new("void"));
        assert_eq!(h.run(&mut t).0, SpawnPoll::Complete);
        let log = h.observer.log.lock();
        assert_eq!(log.fractions.last().copied(), Some(1.0));
        assert_eq!(log.fractions.iter().filter(|f| **f == 1.0).count(), 1);
    }

    #[test]
    fn zero_weight_tail_reaches_one_only_at_the_end() {
        let stages = vec![
            SpawnStage {
                category: SpawnCategory::Npcs,
                placements: vec![Placement::new("p", Vec3::zero())],
                weight: 1.0,
            },
            SpawnStage {
                category: SpawnCategory::ItemDrops,
                placements: vec![
                    Placement::new("p", Vec3::zero()),
                    Placement::new("p", Vec3::zero()),
                ],
                weight: 0.0,
            },
        ];
        let plan = SpawnPlan::new(stages).expect("plan");
        let scene = ScriptedScene::new("field");
        let mut t = SpawnTask::with_plan(1, Box::new(scene), plan, SpawnOptions::default());

        let mut h = Harness::new();
        assert_eq!(h.run(&mut t).0, SpawnPoll::Complete);
        assert_eq!(h.stats.spawned, 3);

        let log = h.observer.log.lock();
        assert_eq!(log.fractions.len(), 5);
        assert_eq!(log.fractions.iter().filter(|f| **f == 1.0).count(), 1);
        assert_eq!(log.fractions.last().copied(), Some(1.0));
        assert!(log.fractions[..4].iter().all(|f| *f < 1.0));
    }

    // -----------------------------------------------------------------------
    // Gating and hooks
    // -----------------------------------------------------------------------

    #[test]
    fn waits_for_server_gate() {
        let mut h = Harness::new();
        let flag = FlagComponent::new("loader", "loaded", false);
        h.components.push(Box::new(flag.clone()));
        let mut t = task(ScriptedScene::uniform("forest", 1).with_authored(&[1]));

        for _ in 0..5 {
            assert_eq!(h.resume(&mut t), SpawnPoll::Pending);
        }
        assert!(h.registry.is_empty());
        assert!(flag.events().is_empty());

        flag.set(true);
        assert_eq!(h.run(&mut t).0, SpawnPoll::Complete);
        let events = flag.events();
        assert_eq!(events.first().map(String::as_str), Some("pre_spawn:forest"));
        assert_eq!(events.last().map(String::as_str), Some("post_spawn:forest"));
    }

    #[test]
    fn admission_opens_only_after_post_spawn() {
        let mut h = Harness::new();
        let mut t = task(ScriptedScene::uniform("forest", 1));
        loop {
            let poll = h.resume(&mut t);
            if poll == SpawnPoll::Complete {
                break;
            }
            assert!(!h.admission.is_open());
        }
        assert!(h.admission.is_open());
        assert!(t.is_done());
    }

    #[test]
    fn authored_entities_registered_before_stages() {
        let mut h = Harness::new();
        let mut t = task(ScriptedScene::new("town").with_authored(&[1, 2]));
        h.resume(&mut t); // gate
        h.resume(&mut t); // authored entities
        assert!(h.registry.contains(EntityId(1)));
        assert!(h.registry.contains(EntityId(2)));
        assert_eq!(h.stats.spawned, 0);
    }

    // -----------------------------------------------------------------------
    // Failure policy
    // -----------------------------------------------------------------------

    #[test]
    fn missing_prefab_is_skipped() {
        let mut h = Harness::new();
        h.factory = TestFactory::new().missing("ghost");
        let scene = ScriptedScene::new("crypt")
            .with(SpawnCategory::Npcs, &["p", "ghost", "p"])
            .with(SpawnCategory::Monsters, &["ghost"]);
        let mut t = task(scene);
        assert_eq!(h.run(&mut t).0, SpawnPoll::Complete);
        assert_eq!(h.stats.spawned, 2);
        assert_eq!(h.stats.skipped, 2);
        assert!(h.admission.is_open());
    }

    // -----------------------------------------------------------------------
    // Observer entity
    // -----------------------------------------------------------------------

    #[test]
    fn observer_spawned_only_when_headless_server() {
        let cases = [
            (true, false, Some("cam"), true),
            (false, false, Some("cam"), false),
            (true, true, Some("cam"), false),
            (true, false, None, false),
        ];
        for (headless, is_client, prefab, expected) in cases {
            let mut h = Harness::new();
            let options = SpawnOptions {
                headless,
                is_client,
                observer_prefab: prefab.map(str::to_string),
            };
            let mut t = SpawnTask::new(1, Box::new(ScriptedScene::new("s")), options);
            h.run(&mut t);
            assert_eq!(h.registry.contains(EntityId(9999)), expected);
        }
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[test]
    fn scene_change_abandons_task() {
        let mut h = Harness::new();
        let mut t = task(ScriptedScene::uniform("forest", 3));
        for _ in 0..4 {
            h.resume(&mut t);
        }
        let before = h.registry.len();
        assert!(before > 0);

        h.generation += 1;
        assert_eq!(h.resume(&mut t), SpawnPoll::Abandoned);
        assert_eq!(h.resume(&mut t), SpawnPoll::Abandoned);
        assert_eq!(h.registry.len(), before);
        assert!(!h.admission.is_open());
    }
}
