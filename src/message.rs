use crate::entity::{DynamicMetadata, Entity};
use crate::food::Food;
use crate::tile::BaseTile;

/// A fully decoded server message, one of the four wire classes.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    Opened(OpenMessage),
    Delta(DeltaMessage),
    Closed { game_id: u32 },
    /// Wholesale replacement of the leaderboard, independent of any match.
    Leaderboard(Vec<LeaderboardEntry>),
}

/// Full snapshot of a match at the moment it becomes visible.
///
/// The three sequences are in column-major position order. Their lengths
/// are validated against `width * height` by the state store, not by the
/// decoder.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenMessage {
    pub game_id: u32,
    pub width: u16,
    pub height: u16,
    pub base_tiles: Vec<BaseTile>,
    pub entities: Vec<Option<Entity>>,
    pub food: Vec<Option<Food>>,
}

/// Everything that changed in one match since its previous message.
/// Segments absent from the wire decode to empty lists.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeltaMessage {
    pub game_id: u32,
    pub died: Vec<EntityDied>,
    pub moved: Vec<EntityMoved>,
    pub spawned: Vec<EntitySpawned>,
    pub food_eaten: Vec<FoodEaten>,
    pub food_spawned: Vec<FoodSpawned>,
    pub metadata_changed: Vec<MetadataChanged>,
}

impl DeltaMessage {
    pub fn is_empty(&self) -> bool {
        self.died.is_empty()
            && self.moved.is_empty()
            && self.spawned.is_empty()
            && self.food_eaten.is_empty()
            && self.food_spawned.is_empty()
            && self.metadata_changed.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityDied {
    pub position: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityMoved {
    pub start: u32,
    pub end: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntitySpawned {
    pub position: u32,
    pub entity: Entity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FoodEaten {
    pub position: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FoodSpawned {
    pub position: u32,
    pub food: Food,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetadataChanged {
    pub position: u32,
    pub metadata: DynamicMetadata,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct LeaderboardEntry {
    pub user_id: u32,
    pub username: String,
    pub high_score: u32,
}
