use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[serde(rename(serialize = "N"))]
    North,
    #[serde(rename(serialize = "E"))]
    East,
    #[serde(rename(serialize = "S"))]
    South,
    #[serde(rename(serialize = "W"))]
    West,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EntityKind {
    #[serde(rename(serialize = "P"))]
    Player,
    #[serde(rename(serialize = "M"))]
    Hazard,
}

impl EntityKind {
    pub fn is_player(&self) -> bool {
        matches!(self, EntityKind::Player)
    }

    pub fn is_hazard(&self) -> bool {
        matches!(self, EntityKind::Hazard)
    }
}

/// The mutable per-entity fields, as opposed to the identity fields
/// (kind, variant) which never change after spawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DynamicMetadata {
    pub direction: Direction,
    pub invulnerable: bool,
    /// Live score of a player entity; hazards never carry one.
    pub live_score: Option<u32>,
}

/// One entity occupying exactly one grid slot. Moving it means taking it
/// out of the source slot and putting the same value into the destination
/// slot; it is never present in two slots at once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// Small id selecting a visual variant; consumers cycle it modulo
    /// their sprite count.
    pub variant: u8,
    pub dynamic: DynamicMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_vocabulary_serializes_as_single_characters() {
        assert_eq!(serde_json::to_string(&Direction::North).unwrap(), "\"N\"");
        assert_eq!(serde_json::to_string(&Direction::West).unwrap(), "\"W\"");
        assert_eq!(serde_json::to_string(&EntityKind::Player).unwrap(), "\"P\"");
        assert_eq!(serde_json::to_string(&EntityKind::Hazard).unwrap(), "\"M\"");
    }

    #[test]
    fn kind_predicates() {
        assert!(EntityKind::Player.is_player());
        assert!(!EntityKind::Player.is_hazard());
        assert!(EntityKind::Hazard.is_hazard());
    }
}
