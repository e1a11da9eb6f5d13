//! Per-match state owned by the client: the grids every delta mutates,
//! plus the bookkeeping a renderer needs to notice changes cheaply.

use std::collections::HashMap;

use log::warn;

use crate::entity::Entity;
use crate::food::Food;
use crate::grid::{Grid, Position};
use crate::message::{DeltaMessage, LeaderboardEntry, OpenMessage};
use crate::tile::BaseTile;

/// Live state of one match between its open and close messages.
///
/// The three grids always hold exactly `width * height` slots; deltas
/// move values between slots but never change the slot count.
#[derive(Clone, Debug)]
pub struct MatchState {
    game_id: u32,
    width: u16,
    height: u16,
    base_tiles: Grid<BaseTile>,
    entities: Grid<Option<Entity>>,
    food: Grid<Option<Food>>,
    entities_generation: u64,
    food_generation: u64,
}

impl MatchState {
    pub fn game_id(&self) -> u32 {
        self.game_id
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn base_tiles(&self) -> &Grid<BaseTile> {
        &self.base_tiles
    }

    pub fn entities(&self) -> &Grid<Option<Entity>> {
        &self.entities
    }

    pub fn food(&self) -> &Grid<Option<Food>> {
        &self.food
    }

    /// Advances on every applied delta. A consumer that remembers the
    /// last value it rendered can skip unchanged matches without any
    /// deep comparison.
    pub fn entities_generation(&self) -> u64 {
        self.entities_generation
    }

    /// Advances only when a delta actually ate or spawned food, so a
    /// consumer can skip redrawing the food layer on pure-movement
    /// ticks.
    pub fn food_generation(&self) -> u64 {
        self.food_generation
    }

    /// Applies one delta in the protocol's fixed order: entity deaths,
    /// moves, spawns, then food eaten, food spawned, then metadata
    /// changes. The order is significant: a death must vacate a slot
    /// before a spawn in the same delta may target it, and metadata
    /// changes address entities at their post-move positions.
    fn apply(&mut self, delta: &DeltaMessage) -> Result<bool, Desync> {
        let slots = self.entities.len();

        for died in &delta.died {
            let position = index(died.position, slots)?;
            if self.entities.take(position).is_none() {
                warn!(
                    "match {}: death at already-empty slot {}",
                    self.game_id, position
                );
            }
        }

        for moved in &delta.moved {
            let start = index(moved.start, slots)?;
            let end = index(moved.end, slots)?;
            let entity = self
                .entities
                .take(start)
                .ok_or(Desync::MoveFromEmpty { start })?;
            if self.entities.replace(end, entity).is_some() {
                return Err(Desync::MoveIntoOccupied { end });
            }
        }

        for spawned in &delta.spawned {
            let position = index(spawned.position, slots)?;
            if self
                .entities
                .replace(position, spawned.entity.clone())
                .is_some()
            {
                return Err(Desync::SpawnOntoOccupied { position });
            }
        }

        let food_changed = !delta.food_eaten.is_empty() || !delta.food_spawned.is_empty();

        for eaten in &delta.food_eaten {
            let position = index(eaten.position, slots)?;
            if self.food.take(position).is_none() {
                warn!(
                    "match {}: food eaten at already-empty slot {}",
                    self.game_id, position
                );
            }
        }

        for spawned in &delta.food_spawned {
            let position = index(spawned.position, slots)?;
            // Overwriting existing food is normal: the server encodes a
            // food type change as a bare spawn.
            self.food.replace(position, spawned.food);
        }

        for change in &delta.metadata_changed {
            let position = index(change.position, slots)?;
            match self.entities.get_mut(position).and_then(Option::as_mut) {
                Some(entity) => entity.dynamic = change.metadata,
                None => warn!(
                    "match {}: metadata change at empty slot {}, skipping",
                    self.game_id, position
                ),
            }
        }

        self.entities_generation += 1;
        if food_changed {
            self.food_generation += 1;
        }

        Ok(food_changed)
    }
}

fn index(position: u32, slots: usize) -> Result<Position, Desync> {
    let index = position as Position;
    if index < slots {
        Ok(index)
    } else {
        Err(Desync::OutOfRange { position, slots })
    }
}

/// A hard inconsistency between the stream and the local grids. Once one
/// of these occurs the match structure can no longer be trusted.
#[derive(Debug, thiserror::Error)]
enum Desync {
    #[error("move out of empty slot {start}")]
    MoveFromEmpty { start: Position },
    #[error("move into occupied slot {end}")]
    MoveIntoOccupied { end: Position },
    #[error("spawn onto occupied slot {position}")]
    SpawnOntoOccupied { position: Position },
    #[error("position {position} outside a {slots}-slot grid")]
    OutOfRange { position: u32, slots: usize },
}

/// Result of applying one delta to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Every record was applied (soft inconsistencies may have been
    /// skipped with a warning).
    Applied { food_changed: bool },
    /// No match with the delta's id is open; nothing happened.
    UnknownMatch,
    /// A hard inconsistency: the match has been discarded and only a
    /// fresh open message brings it back.
    Desynchronized,
}

/// Owns every open match plus the leaderboard.
///
/// There is exactly one writer (the client task); everyone else sees
/// read-only snapshots. Matches are keyed by their externally assigned
/// game id.
#[derive(Debug, Default)]
pub struct StateStore {
    matches: HashMap<u32, MatchState>,
    leaderboard: Vec<LeaderboardEntry>,
}

impl StateStore {
    pub fn new() -> StateStore {
        StateStore::default()
    }

    /// Creates the match described by an open message, replacing any
    /// previous match with the same id. Returns false (creating
    /// nothing) when the decoded sequences disagree with the declared
    /// dimensions; the decoder deliberately leaves that check to us.
    pub fn apply_open(&mut self, open: OpenMessage) -> bool {
        let width = open.width as usize;
        let height = open.height as usize;
        let slots = width * height;
        if open.base_tiles.len() != slots
            || open.entities.len() != slots
            || open.food.len() != slots
        {
            warn!(
                "discarding open for match {}: {}x{} needs {} slots, got {}/{}/{}",
                open.game_id,
                open.width,
                open.height,
                slots,
                open.base_tiles.len(),
                open.entities.len(),
                open.food.len(),
            );
            return false;
        }

        let state = MatchState {
            game_id: open.game_id,
            width: open.width,
            height: open.height,
            base_tiles: Grid::from_slots(open.base_tiles, width, height),
            entities: Grid::from_slots(open.entities, width, height),
            food: Grid::from_slots(open.food, width, height),
            entities_generation: 0,
            food_generation: 0,
        };

        if self.matches.insert(open.game_id, state).is_some() {
            warn!(
                "match {} opened while already open, replacing its state",
                open.game_id
            );
        }
        true
    }

    /// Applies a delta to the match it names. A delta for an unknown id
    /// is a reported no-op, never an error; a hard inconsistency
    /// discards the match entirely.
    pub fn apply_delta(&mut self, delta: &DeltaMessage) -> DeltaOutcome {
        let state = match self.matches.get_mut(&delta.game_id) {
            Some(state) => state,
            None => {
                warn!("delta for match {} which is not open", delta.game_id);
                return DeltaOutcome::UnknownMatch;
            }
        };

        match state.apply(delta) {
            Ok(food_changed) => DeltaOutcome::Applied { food_changed },
            Err(desync) => {
                warn!("match {} desynchronized: {}", delta.game_id, desync);
                self.matches.remove(&delta.game_id);
                DeltaOutcome::Desynchronized
            }
        }
    }

    /// Removes the match. Closing an id that is not open (a second close
    /// for the same match, say) is a no-op.
    pub fn apply_close(&mut self, game_id: u32) -> bool {
        self.matches.remove(&game_id).is_some()
    }

    pub fn set_leaderboard(&mut self, entries: Vec<LeaderboardEntry>) {
        self.leaderboard = entries;
    }

    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    pub fn match_state(&self, game_id: u32) -> Option<&MatchState> {
        self.matches.get(&game_id)
    }

    pub fn matches(&self) -> impl Iterator<Item = &MatchState> {
        self.matches.values()
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    /// Drops every open match. Called when a connection is established:
    /// match state never outlives the connection that streamed it, and a
    /// match that closed during an outage must not survive as a ghost.
    pub fn clear_matches(&mut self) {
        self.matches.clear();
    }
}
