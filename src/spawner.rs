//! Staged world spawner.
//!
//! Populates a freshly loaded scene in a fixed category order, one placement
//! per resume, so a large map never stalls the frame driver. The spawner is an
//! explicit resumable task: the server calls [`SpawnTask::resume`] once per
//! tick until it reports [`SpawnPoll::Complete`] or [`SpawnPoll::Abandoned`].
//!
//! ```text
//! AwaitReady ─► RegisterScene ─► Stage(0..n) ─► Observer ─► Finish ─► PostSpawn ─► Done
//!     ▲ polls the server gate        │ one placement per resume        └─ opens player admission
//! ```
//!
//! Every resume first compares the scene generation it was started for with
//! the current one; a mismatch means the scene changed underneath and the task
//! stops without touching the new scene.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::component::ManagerComponent;
use crate::entity::SharedEntity;
use crate::error::{SyncError, SyncResult};
use crate::readiness::{AdmissionLatch, ReadinessGate};
use crate::registry::EntityRegistry;
use crate::types::{Vec3, WorldStats};

/// Largest `f32` below `1.0`; caps every report but the final stage boundary.
const JUST_BELOW_ONE: f32 = 1.0 - f32::EPSILON / 2.0;

const WEIGHT_TOLERANCE: f32 = 1e-4;

// ---------------------------------------------------------------------------
// Content description
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnCategory {
    WarpPortals,
    Npcs,
    Monsters,
    Harvestables,
    ItemDrops,
}

impl SpawnCategory {
    /// Population order.
    pub const ORDER: [SpawnCategory; 5] = [
        SpawnCategory::WarpPortals,
        SpawnCategory::Npcs,
        SpawnCategory::Monsters,
        SpawnCategory::Harvestables,
        SpawnCategory::ItemDrops,
    ];

    pub fn default_weight(self) -> f32 {
        match self {
            SpawnCategory::WarpPortals | SpawnCategory::Npcs | SpawnCategory::Monsters => 0.25,
            SpawnCategory::Harvestables | SpawnCategory::ItemDrops => 0.125,
        }
    }
}

impl std::fmt::Display for SpawnCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpawnCategory::WarpPortals => "warp portals",
            SpawnCategory::Npcs => "npcs",
            SpawnCategory::Monsters => "monsters",
            SpawnCategory::Harvestables => "harvestables",
            SpawnCategory::ItemDrops => "item drops",
        };
        f.write_str(name)
    }
}

/// One placement record: what to instantiate and where.
///
/// For the spawner categories (monsters, harvestables, item drops) a record is
/// a spawn area and may yield several entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub prefab: String,
    pub position: Vec3,
    /// Euler angles in degrees.
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Placement {
    pub fn new(prefab: impl Into<String>, position: Vec3) -> Self {
        Self {
            prefab: prefab.into(),
            position,
            rotation: Vec3::zero(),
            params: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnStage {
    pub category: SpawnCategory,
    pub placements: Vec<Placement>,
    pub weight: f32,
}

/// Ordered stages whose weights sum to 1.0.
#[derive(Debug, Clone)]
pub struct SpawnPlan {
    stages: Vec<SpawnStage>,
    /// Progress value at the start of each stage.
    offsets: Vec<f32>,
}

impl SpawnPlan {
    pub fn new(stages: Vec<SpawnStage>) -> SyncResult<Self> {
        let total: f32 = stages.iter().map(|s| s.weight).sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE || stages.iter().any(|s| s.weight < 0.0) {
            return Err(SyncError::InvalidSpawnWeights(total));
        }
        let mut offsets = Vec::with_capacity(stages.len());
        let mut acc = 0.0f32;
        for stage in &stages {
            offsets.push(acc);
            acc += stage.weight;
        }
        Ok(Self { stages, offsets })
    }

    /// Standard five-category plan read from `content`. A category the content
    /// has no data for is logged and left empty.
    pub fn from_content(content: &dyn SceneContent) -> Self {
        let stages = SpawnCategory::ORDER
            .iter()
            .map(|&category| {
                let placements = content.placements(category).unwrap_or_else(|| {
                    warn!(
                        "Scene '{}' has no {} data, skipping category",
                        content.scene_id(),
                        category
                    );
                    Vec::new()
                });
                SpawnStage {
                    category,
                    placements,
                    weight: category.default_weight(),
                }
            })
            .collect::<Vec<_>>();
        let mut offsets = Vec::with_capacity(stages.len());
        let mut acc = 0.0f32;
        for stage in &stages {
            offsets.push(acc);
            acc += stage.weight;
        }
        Self { stages, offsets }
    }

    pub fn stages(&self) -> &[SpawnStage] {
        &self.stages
    }

    pub fn total_placements(&self) -> usize {
        self.stages.iter().map(|s| s.placements.len()).sum()
    }

    fn stage_end(&self, stage: usize) -> f32 {
        if stage + 1 >= self.stages.len() {
            1.0
        } else {
            self.offsets[stage + 1]
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Supplies placement records and pre-authored entities for one scene.
pub trait SceneContent: Send {
    fn scene_id(&self) -> &str;

    /// `None` when the scene has no data at all for `category`.
    fn placements(&self, category: SpawnCategory) -> Option<Vec<Placement>>;

    /// Statically placed entities that exist before spawning starts.
    fn scene_entities(&self) -> Vec<SharedEntity> {
        Vec::new()
    }

    fn start_position(&self) -> Vec3 {
        Vec3::zero()
    }
}

/// Turns placement records into live entities.
pub trait EntityFactory: Send {
    /// Missing prefabs are reported as [`SyncError::MissingPrefab`]; the
    /// spawner skips the item and continues.
    fn instantiate(
        &mut self,
        category: SpawnCategory,
        placement: &Placement,
    ) -> SyncResult<Vec<SharedEntity>>;

    fn instantiate_observer(&mut self, prefab: &str, position: Vec3) -> SyncResult<SharedEntity>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnProgress<'a> {
    pub scene: &'a str,
    /// Category just advanced; `None` for start/finish notifications.
    pub category: Option<SpawnCategory>,
    pub is_server: bool,
    pub fraction: f32,
}

/// Purely observational progress callbacks.
pub trait SpawnObserver: Send {
    fn on_spawn_start(&mut self, _progress: &SpawnProgress<'_>) {}

    fn on_spawn_progress(&mut self, _progress: &SpawnProgress<'_>) {}

    fn on_spawn_finish(&mut self, _progress: &SpawnProgress<'_>) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default)]
pub struct NoopSpawnObserver;

impl SpawnObserver for NoopSpawnObserver {}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPoll {
    Pending,
    Complete,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    AwaitReady,
    RegisterScene,
    Stage { stage: usize, item: usize },
    StageDone { stage: usize },
    Observer,
    Finish,
    PostSpawn,
    Done,
}

/// Everything a resume may touch, borrowed from the server for one step.
pub struct SpawnEnv<'a> {
    pub scene_generation: u64,
    pub now: Duration,
    pub gate: &'a mut ReadinessGate,
    pub admission: &'a mut AdmissionLatch,
    pub components: &'a mut [Box<dyn ManagerComponent>],
    pub registry: &'a mut EntityRegistry,
    pub factory: &'a mut dyn EntityFactory,
    pub observer: &'a mut dyn SpawnObserver,
    pub stats: &'a mut WorldStats,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub headless: bool,
    /// Process also runs a local client (host mode).
    pub is_client: bool,
    pub observer_prefab: Option<String>,
}

pub struct SpawnTask {
    generation: u64,
    content: Box<dyn SceneContent>,
    plan: SpawnPlan,
    options: SpawnOptions,
    step: Step,
    progress: f32,
}

impl SpawnTask {
    pub fn new(generation: u64, content: Box<dyn SceneContent>, options: SpawnOptions) -> Self {
        let plan = SpawnPlan::from_content(content.as_ref());
        Self::with_plan(generation, content, plan, options)
    }

    pub fn with_plan(
        generation: u64,
        content: Box<dyn SceneContent>,
        plan: SpawnPlan,
        options: SpawnOptions,
    ) -> Self {
        Self {
            generation,
            content,
            plan,
            options,
            step: Step::AwaitReady,
            progress: 0.0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn scene_id(&self) -> &str {
        self.content.scene_id()
    }

    /// Last fraction reported to the observer.
    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    /// Advance by at most one unit of work, then yield.
    pub fn resume(&mut self, env: &mut SpawnEnv<'_>) -> SpawnPoll {
        if env.scene_generation != self.generation {
            info!(
                "Spawn for scene '{}' abandoned after scene change",
                self.content.scene_id()
            );
            return SpawnPoll::Abandoned;
        }

        match self.step {
            Step::AwaitReady => {
                if !env.gate.poll(env.now, env.components) {
                    return SpawnPoll::Pending;
                }
                let scene = self.content.scene_id().to_string();
                info!("Spawning entities for scene '{}'", scene);
                env.observer.on_spawn_start(&SpawnProgress {
                    scene: &scene,
                    category: None,
                    is_server: true,
                    fraction: 0.0,
                });
                for component in env.components.iter_mut() {
                    component.pre_spawn(&scene);
                }
                self.step = Step::RegisterScene;
            }
            Step::RegisterScene => {
                let entities = self.content.scene_entities();
                debug!("Registering {} scene entities", entities.len());
                for entity in entities {
                    env.registry.register(entity);
                }
                self.step = self.stage_entry(0);
            }
            Step::Stage { stage, item } => {
                let category = self.plan.stages[stage].category;
                let count = self.plan.stages[stage].placements.len();
                if item == 0 {
                    info!("Spawning {} ({})", category, count);
                }
                self.spawn_placement(stage, item, env);

                let base = self.plan.offsets[stage];
                let weight = self.plan.stages[stage].weight;
                let fraction = base + (item as f32 / count as f32) * weight;
                self.report(env, Some(category), fraction.min(JUST_BELOW_ONE));

                self.step = if item + 1 < count {
                    Step::Stage {
                        stage,
                        item: item + 1,
                    }
                } else {
                    Step::StageDone { stage }
                };
            }
            Step::StageDone { stage } => {
                let category = self.plan.stages[stage].category;
                // Only the last stage boundary may publish 1.0; zero-weight
                // tails and float drift must not reach it early.
                let end = if stage + 1 == self.plan.stages.len() {
                    1.0
                } else {
                    self.plan.stage_end(stage).min(JUST_BELOW_ONE)
                };
                self.report(env, Some(category), end);
                self.step = self.stage_entry(stage + 1);
            }
            Step::Observer => {
                self.spawn_observer(env);
                self.step = Step::Finish;
            }
            Step::Finish => {
                let scene = self.content.scene_id().to_string();
                env.observer.on_spawn_finish(&SpawnProgress {
                    scene: &scene,
                    category: None,
                    is_server: true,
                    fraction: self.progress,
                });
                self.step = Step::PostSpawn;
            }
            Step::PostSpawn => {
                let scene = self.content.scene_id().to_string();
                for component in env.components.iter_mut() {
                    component.post_spawn(&scene);
                }
                if env.admission.open(env.gate) {
                    info!("Scene '{}' populated, admitting players", scene);
                }
                self.step = Step::Done;
                return SpawnPoll::Complete;
            }
            Step::Done => return SpawnPoll::Complete,
        }
        SpawnPoll::Pending
    }

    fn stage_entry(&self, stage: usize) -> Step {
        match self.plan.stages.get(stage) {
            None => Step::Observer,
            Some(s) if s.placements.is_empty() => Step::StageDone { stage },
            Some(_) => Step::Stage { stage, item: 0 },
        }
    }

    fn spawn_placement(&mut self, stage: usize, item: usize, env: &mut SpawnEnv<'_>) {
        let category = self.plan.stages[stage].category;
        let placement = &self.plan.stages[stage].placements[item];
        match env.factory.instantiate(category, placement) {
            Ok(entities) => {
                for entity in entities {
                    if env.registry.register(entity) {
                        env.stats.spawned += 1;
                    }
                }
            }
            Err(e) => {
                warn!("Skipping {} placement {}: {}", category, item, e);
                env.stats.skipped += 1;
            }
        }
    }

    fn spawn_observer(&mut self, env: &mut SpawnEnv<'_>) {
        if self.options.is_client || !self.options.headless {
            return;
        }
        let Some(prefab) = self.options.observer_prefab.as_deref() else {
            return;
        };
        info!("Spawning observer '{}'", prefab);
        match env
            .factory
            .instantiate_observer(prefab, self.content.start_position())
        {
            Ok(entity) => {
                env.registry.register(entity);
            }
            Err(e) => warn!("Observer spawn skipped: {}", e),
        }
    }

    fn report(&mut self, env: &mut SpawnEnv<'_>, category: Option<SpawnCategory>, fraction: f32) {
        self.progress = self.progress.max(fraction);
        let scene = self.content.scene_id();
        env.observer.on_spawn_progress(&SpawnProgress {
            scene,
            category,
            is_server: true,
            fraction: self.progress,
        });
    }
}
