//! Error taxonomy for the sync core.
//!
//! Nothing here is fatal to the process. Orchestrators log these and move on
//! to the next item or the next tick.

use crate::spawner::SpawnCategory;
use crate::types::EntityId;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("frame too short: need {needed} bytes, got {got}")]
    FrameTooShort { needed: usize, got: usize },

    #[error("unknown message tag {0}")]
    UnknownTag(u16),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("spawn plan weights sum to {0}, expected 1.0")]
    InvalidSpawnWeights(f32),

    #[error("no prefab for {category} placement '{prefab}'")]
    MissingPrefab {
        category: SpawnCategory,
        prefab: String,
    },

    #[error("state type mismatch on {entity}: expected {expected}, found {found}")]
    StateTypeMismatch {
        entity: EntityId,
        expected: String,
        found: String,
    },

    #[error("malformed state payload for {0}")]
    MalformedState(EntityId),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
