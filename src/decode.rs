//! Decoding of the spectator wire protocol.
//!
//! Messages are short ASCII lines whose first character selects the
//! class: `i` match opened, `d` delta, `c` match closed, `l`
//! leaderboard. Everything here is pure: one raw message in, one
//! [`ServerMessage`] or a [`DecodeError`] out, no state carried between
//! calls.

use crate::entity::{Direction, DynamicMetadata, Entity, EntityKind};
use crate::error::DecodeError;
use crate::food::Food;
use crate::message::{
    DeltaMessage, EntityDied, EntityMoved, EntitySpawned, FoodEaten, FoodSpawned,
    LeaderboardEntry, MetadataChanged, OpenMessage, ServerMessage,
};
use crate::tile::BaseTile;

/// Ceiling on a single empty-slot run in a sparse grid. A run above this
/// cannot belong to any real match and would only serve to balloon the
/// decoded vector before the state store rejects it.
const MAX_EMPTY_RUN: u32 = 1 << 20;

/// Decodes one raw message. The whole input must be consumed; trailing
/// bytes are an error.
pub fn decode_message(raw: &str) -> Result<ServerMessage, DecodeError> {
    let mut scanner = Scanner::new(raw);
    let message = match scanner.bump().ok_or(DecodeError::Empty)? {
        'i' => ServerMessage::Opened(decode_open(&mut scanner)?),
        'd' => ServerMessage::Delta(decode_delta(&mut scanner)?),
        'c' => ServerMessage::Closed {
            game_id: scanner.number()?,
        },
        'l' => ServerMessage::Leaderboard(decode_leaderboard(&mut scanner)?),
        tag => {
            return Err(DecodeError::UnknownTag {
                tag,
                raw: raw.to_owned(),
            })
        }
    };
    scanner.expect_end()?;
    Ok(message)
}

fn decode_open(scanner: &mut Scanner<'_>) -> Result<OpenMessage, DecodeError> {
    let game_id = scanner.number()?;
    scanner.expect('_', "`_` after the game id")?;
    let width = scanner.dimension()?;
    scanner.expect('_', "`_` after the width")?;
    let height = scanner.dimension()?;
    scanner.expect('_', "`_` after the height")?;

    let mut base_tiles = Vec::new();
    loop {
        match scanner.peek() {
            Some('|') => break,
            Some(_) => base_tiles.push(BaseTile::decode(scanner)?),
            None => return Err(scanner.error("`|` after the base tiles")),
        }
    }
    scanner.expect('|', "`|` after the base tiles")?;

    let entities = decode_sparse::<Entity>(scanner, Some('|'))?;
    scanner.expect('|', "`|` after the entity grid")?;
    let food = decode_sparse::<Food>(scanner, None)?;

    Ok(OpenMessage {
        game_id,
        width,
        height,
        base_tiles,
        entities,
        food,
    })
}

/// Decodes a sparse grid body: a run of decimal digits emits that many
/// empty slots, anything else starts a value token. Runs until `until`
/// (or the end of the input). The slot count is *not* validated here;
/// the state store knows the match dimensions and rejects mismatches.
fn decode_sparse<T: Decode>(
    scanner: &mut Scanner<'_>,
    until: Option<char>,
) -> Result<Vec<Option<T>>, DecodeError> {
    let mut slots = Vec::new();
    loop {
        match scanner.peek() {
            None => break,
            Some(c) if Some(c) == until => break,
            Some(c) if c.is_ascii_digit() => {
                let at = scanner.at;
                let run = scanner.number()?;
                if run > MAX_EMPTY_RUN {
                    return Err(DecodeError::RunTooLong {
                        run,
                        at,
                        raw: scanner.raw.to_owned(),
                    });
                }
                for _ in 0..run {
                    slots.push(None);
                }
            }
            Some(_) => slots.push(Some(T::decode(scanner)?)),
        }
    }
    Ok(slots)
}

/// The six delta segments, each optional, each introduced by its tag
/// character, in this fixed order. A segment's records all begin with a
/// decimal digit, so the next lowercase tag (or the end of the input)
/// terminates it implicitly.
fn decode_delta(scanner: &mut Scanner<'_>) -> Result<DeltaMessage, DecodeError> {
    let game_id = scanner.number()?;
    scanner.expect('_', "`_` after the game id")?;

    let mut delta = DeltaMessage {
        game_id,
        ..DeltaMessage::default()
    };

    if scanner.take_tag('a') {
        delta.died = decode_records(scanner)?;
    }
    if scanner.take_tag('b') {
        delta.moved = decode_records(scanner)?;
    }
    if scanner.take_tag('c') {
        delta.spawned = decode_records(scanner)?;
    }
    if scanner.take_tag('d') {
        delta.food_eaten = decode_records(scanner)?;
    }
    if scanner.take_tag('e') {
        delta.food_spawned = decode_records(scanner)?;
    }
    if scanner.take_tag('f') {
        delta.metadata_changed = decode_records(scanner)?;
    }

    Ok(delta)
}

fn decode_records<T: Decode>(scanner: &mut Scanner<'_>) -> Result<Vec<T>, DecodeError> {
    let mut records = Vec::new();
    while scanner.peek().map_or(false, |c| c.is_ascii_digit()) {
        records.push(T::decode(scanner)?);
    }
    Ok(records)
}

/// `{id}_{username}_{highScore},` repeated. Usernames may themselves
/// contain underscores, so the id is split off at the first `_` and the
/// score at the last.
fn decode_leaderboard(scanner: &mut Scanner<'_>) -> Result<Vec<LeaderboardEntry>, DecodeError> {
    let mut entries = Vec::new();
    while !scanner.at_end() {
        let at = scanner.at;
        let entry = scanner.take_until(',', "`,` after a leaderboard entry")?;
        let parse = || -> Option<LeaderboardEntry> {
            let (id, rest) = entry.split_once('_')?;
            let (username, score) = rest.rsplit_once('_')?;
            Some(LeaderboardEntry {
                user_id: id.parse().ok()?,
                username: username.to_owned(),
                high_score: score.parse().ok()?,
            })
        };
        match parse() {
            Some(entry) => entries.push(entry),
            None => {
                return Err(DecodeError::Expected {
                    expected: "a `{id}_{username}_{score}` leaderboard entry",
                    at,
                    raw: scanner.raw.to_owned(),
                })
            }
        }
    }
    Ok(entries)
}

/// Inverse of the server's per-type serializer: every wire vocabulary
/// item knows how to consume itself from the scanner. Kept private since
/// the tokens only make sense embedded in a full message.
trait Decode: Sized {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError>;
}

impl Decode for Direction {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        scanner.pick("a direction (N, E, S or W)", |c| match c {
            'N' => Some(Direction::North),
            'E' => Some(Direction::East),
            'S' => Some(Direction::South),
            'W' => Some(Direction::West),
            _ => None,
        })
    }
}

impl Decode for Food {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        scanner.pick("a food kind (F or P)", |c| match c {
            'F' => Some(Food::Fruit),
            'P' => Some(Food::Power),
            _ => None,
        })
    }
}

impl Decode for BaseTile {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        scanner.pick("a base tile (L or X)", |c| match c {
            'L' => Some(BaseTile::Floor),
            'X' => Some(BaseTile::Wall),
            _ => None,
        })
    }
}

impl Decode for EntityKind {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        scanner.pick("an entity kind (P or M)", |c| match c {
            'P' => Some(EntityKind::Player),
            'M' => Some(EntityKind::Hazard),
            _ => None,
        })
    }
}

/// Direction, then an optional run of digits carrying a player's live
/// score, then the invulnerability flag. The flag must be `I` or `V`:
/// admitting score digits means any other byte there would make the
/// token boundary ambiguous.
impl Decode for DynamicMetadata {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        let direction = Direction::decode(scanner)?;
        let live_score = if scanner.peek().map_or(false, |c| c.is_ascii_digit()) {
            Some(scanner.number()?)
        } else {
            None
        };
        let invulnerable = scanner.pick("an invulnerability flag (I or V)", |c| match c {
            'I' => Some(true),
            'V' => Some(false),
            _ => None,
        })?;
        Ok(DynamicMetadata {
            direction,
            invulnerable,
            live_score,
        })
    }
}

/// Dynamic metadata, then the kind character, then exactly one variant
/// digit. The single-digit variant is what keeps a sparse grid
/// unambiguous: the digits after it always belong to the next
/// empty-slot run.
impl Decode for Entity {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        let dynamic = DynamicMetadata::decode(scanner)?;
        let kind = EntityKind::decode(scanner)?;
        let variant = scanner.digit("a variant digit")?;
        Ok(Entity {
            kind,
            variant,
            dynamic,
        })
    }
}

impl Decode for EntityDied {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        Ok(EntityDied {
            position: scanner.comma_number()?,
        })
    }
}

impl Decode for EntityMoved {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        Ok(EntityMoved {
            start: scanner.comma_number()?,
            end: scanner.comma_number()?,
        })
    }
}

impl Decode for EntitySpawned {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        Ok(EntitySpawned {
            position: scanner.number()?,
            entity: Entity::decode(scanner)?,
        })
    }
}

impl Decode for FoodEaten {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        Ok(FoodEaten {
            position: scanner.comma_number()?,
        })
    }
}

impl Decode for FoodSpawned {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        Ok(FoodSpawned {
            position: scanner.number()?,
            food: Food::decode(scanner)?,
        })
    }
}

impl Decode for MetadataChanged {
    fn decode(scanner: &mut Scanner<'_>) -> Result<Self, DecodeError> {
        Ok(MetadataChanged {
            position: scanner.number()?,
            metadata: DynamicMetadata::decode(scanner)?,
        })
    }
}

/// Byte cursor over one raw message. The protocol is ASCII; usernames in
/// leaderboard entries are the only place arbitrary UTF-8 appears, and
/// those are only ever sliced at ASCII separators.
struct Scanner<'a> {
    raw: &'a str,
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Scanner<'a> {
    fn new(raw: &'a str) -> Scanner<'a> {
        Scanner {
            raw,
            bytes: raw.as_bytes(),
            at: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.bytes.get(self.at).map(|b| *b as char)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.at += 1;
        Some(c)
    }

    fn at_end(&self) -> bool {
        self.at >= self.bytes.len()
    }

    fn error(&self, expected: &'static str) -> DecodeError {
        DecodeError::Expected {
            expected,
            at: self.at,
            raw: self.raw.to_owned(),
        }
    }

    /// Consumes one character through `accept`, failing without
    /// consuming anything if it is rejected or the input is exhausted.
    fn pick<T>(
        &mut self,
        expected: &'static str,
        accept: impl Fn(char) -> Option<T>,
    ) -> Result<T, DecodeError> {
        let picked = self.peek().and_then(accept).ok_or_else(|| self.error(expected))?;
        self.at += 1;
        Ok(picked)
    }

    /// Maximal run of decimal digits as one number.
    fn number(&mut self) -> Result<u32, DecodeError> {
        let start = self.at;
        let mut value: u32 = 0;
        while let Some(digit) = self.peek().and_then(|c| c.to_digit(10)) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(DecodeError::NumberOverflow {
                    at: start,
                    raw: self.raw.to_owned(),
                })?;
            self.at += 1;
        }
        if self.at == start {
            return Err(self.error("a decimal number"));
        }
        Ok(value)
    }

    fn comma_number(&mut self) -> Result<u32, DecodeError> {
        let number = self.number()?;
        self.expect(',', "`,` after a position")?;
        Ok(number)
    }

    /// Exactly one decimal digit.
    fn digit(&mut self, expected: &'static str) -> Result<u8, DecodeError> {
        self.pick(expected, |c| c.to_digit(10).map(|d| d as u8))
    }

    /// A match dimension; must fit in 16 bits.
    fn dimension(&mut self) -> Result<u16, DecodeError> {
        let at = self.at;
        u16::try_from(self.number()?).map_err(|_| DecodeError::Expected {
            expected: "a dimension below 65536",
            at,
            raw: self.raw.to_owned(),
        })
    }

    /// Consumes the tag character `c` if it is next, reporting whether it
    /// was there. Unlike [`expect`](Self::expect) a miss is not an error:
    /// the segment it introduces is simply absent.
    fn take_tag(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<(), DecodeError> {
        if self.peek() == Some(c) {
            self.at += 1;
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_end(&self) -> Result<(), DecodeError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("end of message"))
        }
    }

    /// Everything up to the next `sep`, which is consumed as well.
    fn take_until(&mut self, sep: char, expected: &'static str) -> Result<&'a str, DecodeError> {
        let start = self.at;
        while let Some(c) = self.peek() {
            if c == sep {
                let piece = &self.raw[start..self.at];
                self.at += 1;
                return Ok(piece);
            }
            self.at += 1;
        }
        Err(DecodeError::Expected {
            expected,
            at: start,
            raw: self.raw.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn player(variant: u8, direction: Direction, invulnerable: bool) -> Entity {
        Entity {
            kind: EntityKind::Player,
            variant,
            dynamic: DynamicMetadata {
                direction,
                invulnerable,
                live_score: None,
            },
        }
    }

    fn hazard(variant: u8, direction: Direction) -> Entity {
        Entity {
            kind: EntityKind::Hazard,
            variant,
            dynamic: DynamicMetadata {
                direction,
                invulnerable: false,
                live_score: None,
            },
        }
    }

    #[test]
    fn decodes_an_open_message() {
        let message = decode_message("i1_2_2_XLXL|1NIP02|1F1P").unwrap();
        assert_eq!(
            message,
            ServerMessage::Opened(OpenMessage {
                game_id: 1,
                width: 2,
                height: 2,
                base_tiles: vec![
                    BaseTile::Wall,
                    BaseTile::Floor,
                    BaseTile::Wall,
                    BaseTile::Floor,
                ],
                entities: vec![
                    None,
                    Some(player(0, Direction::North, true)),
                    None,
                    None,
                ],
                food: vec![None, Some(Food::Fruit), None, Some(Food::Power)],
            })
        );
    }

    #[test]
    fn decodes_adjacent_value_tokens_without_separators() {
        let message = decode_message("i9_2_1_LL|NIP0SVM1|FP").unwrap();
        match message {
            ServerMessage::Opened(open) => {
                assert_eq!(
                    open.entities,
                    vec![
                        Some(player(0, Direction::North, true)),
                        Some(hazard(1, Direction::South)),
                    ]
                );
                assert_eq!(open.food, vec![Some(Food::Fruit), Some(Food::Power)]);
            }
            other => panic!("expected an open message, got {:?}", other),
        }
    }

    #[test]
    fn multi_digit_runs_are_one_number() {
        let message = decode_message("i3_4_3_LLLLLLLLLLLL|12|10FP").unwrap();
        match message {
            ServerMessage::Opened(open) => {
                assert_eq!(open.entities, vec![None; 12]);
                assert_eq!(open.food.len(), 12);
                assert_eq!(open.food[10], Some(Food::Fruit));
                assert_eq!(open.food[11], Some(Food::Power));
            }
            other => panic!("expected an open message, got {:?}", other),
        }
    }

    #[test]
    fn sparse_slot_count_is_run_sum_plus_token_count() {
        let mut scanner = Scanner::new("2F3P1NVM0");
        let food = decode_sparse::<Food>(&mut scanner, Some('N')).unwrap();
        assert_eq!(food.len(), 2 + 1 + 3 + 1 + 1);
        assert_eq!(food.iter().filter(|slot| slot.is_some()).count(), 2);
    }

    #[test]
    fn decodes_a_player_score_inside_a_dynamic_token() {
        let message = decode_message("d7_c5S12IP3").unwrap();
        assert_eq!(
            message,
            ServerMessage::Delta(DeltaMessage {
                game_id: 7,
                spawned: vec![EntitySpawned {
                    position: 5,
                    entity: Entity {
                        kind: EntityKind::Player,
                        variant: 3,
                        dynamic: DynamicMetadata {
                            direction: Direction::South,
                            invulnerable: true,
                            live_score: Some(12),
                        },
                    },
                }],
                ..DeltaMessage::default()
            })
        );
    }

    #[test]
    fn decodes_every_delta_segment() {
        let message = decode_message("d2_a3,b0,1,4,5,c9NVM2d6,e7F8Pf1SI").unwrap();
        assert_eq!(
            message,
            ServerMessage::Delta(DeltaMessage {
                game_id: 2,
                died: vec![EntityDied { position: 3 }],
                moved: vec![
                    EntityMoved { start: 0, end: 1 },
                    EntityMoved { start: 4, end: 5 },
                ],
                spawned: vec![EntitySpawned {
                    position: 9,
                    entity: hazard(2, Direction::North),
                }],
                food_eaten: vec![FoodEaten { position: 6 }],
                food_spawned: vec![
                    FoodSpawned {
                        position: 7,
                        food: Food::Fruit,
                    },
                    FoodSpawned {
                        position: 8,
                        food: Food::Power,
                    },
                ],
                metadata_changed: vec![MetadataChanged {
                    position: 1,
                    metadata: DynamicMetadata {
                        direction: Direction::South,
                        invulnerable: true,
                        live_score: None,
                    },
                }],
            })
        );
    }

    #[test]
    fn a_delta_can_skip_middle_segments() {
        let message = decode_message("d1_a3,b0,1,f1SI").unwrap();
        assert_eq!(
            message,
            ServerMessage::Delta(DeltaMessage {
                game_id: 1,
                died: vec![EntityDied { position: 3 }],
                moved: vec![EntityMoved { start: 0, end: 1 }],
                metadata_changed: vec![MetadataChanged {
                    position: 1,
                    metadata: DynamicMetadata {
                        direction: Direction::South,
                        invulnerable: true,
                        live_score: None,
                    },
                }],
                ..DeltaMessage::default()
            })
        );
    }

    #[test]
    fn a_delta_with_no_segments_is_empty() {
        let message = decode_message("d4_").unwrap();
        match message {
            ServerMessage::Delta(delta) => {
                assert_eq!(delta.game_id, 4);
                assert!(delta.is_empty());
            }
            other => panic!("expected a delta, got {:?}", other),
        }
    }

    #[test]
    fn decodes_a_close_message() {
        assert_eq!(
            decode_message("c15").unwrap(),
            ServerMessage::Closed { game_id: 15 }
        );
    }

    #[test]
    fn decodes_a_leaderboard() {
        assert_eq!(
            decode_message("l1_alice_300,2_under_score_150,").unwrap(),
            ServerMessage::Leaderboard(vec![
                LeaderboardEntry {
                    user_id: 1,
                    username: "alice".to_owned(),
                    high_score: 300,
                },
                LeaderboardEntry {
                    user_id: 2,
                    username: "under_score".to_owned(),
                    high_score: 150,
                },
            ])
        );
    }

    #[test]
    fn rejects_an_empty_message() {
        assert_eq!(decode_message(""), Err(DecodeError::Empty));
    }

    #[test]
    fn rejects_an_unknown_tag() {
        assert_eq!(
            decode_message("x1"),
            Err(DecodeError::UnknownTag {
                tag: 'x',
                raw: "x1".to_owned(),
            })
        );
    }

    #[test]
    fn rejects_an_unknown_base_tile() {
        // The serializer historically knew a third tile; the protocol
        // only admits two, so anything else is malformed.
        assert!(matches!(
            decode_message("i1_1_1_W||1"),
            Err(DecodeError::Expected {
                expected: "a base tile (L or X)",
                ..
            })
        ));
    }

    #[test]
    fn rejects_a_truncated_entity_token() {
        assert!(matches!(
            decode_message("i1_2_1_LL|NIP|2"),
            Err(DecodeError::Expected {
                expected: "a variant digit",
                ..
            })
        ));
    }

    #[test]
    fn rejects_a_bad_invulnerability_flag() {
        assert!(matches!(
            decode_message("d1_f1SX"),
            Err(DecodeError::Expected {
                expected: "an invulnerability flag (I or V)",
                ..
            })
        ));
    }

    #[test]
    fn rejects_a_missing_comma() {
        assert!(matches!(
            decode_message("d1_a3"),
            Err(DecodeError::Expected {
                expected: "`,` after a position",
                ..
            })
        ));
    }

    #[test]
    fn rejects_out_of_order_segments() {
        assert!(matches!(
            decode_message("d1_b0,1,a3,"),
            Err(DecodeError::Expected {
                expected: "end of message",
                ..
            })
        ));
    }

    #[test]
    fn rejects_a_number_that_overflows() {
        assert!(matches!(
            decode_message("c99999999999"),
            Err(DecodeError::NumberOverflow { .. })
        ));
    }

    #[test]
    fn rejects_an_absurd_empty_run() {
        assert!(matches!(
            decode_message("i1_1_1_L|4294967295|1"),
            Err(DecodeError::RunTooLong { .. })
        ));
    }

    #[test]
    fn rejects_a_malformed_leaderboard_entry() {
        assert!(matches!(
            decode_message("l1alice300,"),
            Err(DecodeError::Expected {
                expected: "a `{id}_{username}_{score}` leaderboard entry",
                ..
            })
        ));
    }
}
