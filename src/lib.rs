//! Client for the maze-arcade spectator stream.
//!
//! The tournament server broadcasts every live match over one persistent
//! websocket as a compact text protocol: a full snapshot when a match
//! opens, incremental deltas while it runs, a close when it ends, plus a
//! leaderboard that is replaced wholesale. This crate owns the
//! connection (with reconnection and exponential backoff), decodes the
//! protocol and maintains a queryable grid per match, so a renderer only
//! has to draw.
//!
//! ```no_run
//! use spectator::{ClientConfig, SpectatorClient, SpectatorEvent};
//!
//! # async fn demo() {
//! let (client, mut events) = SpectatorClient::start(ClientConfig::default());
//!
//! while let Some(event) = events.recv().await {
//!     if let SpectatorEvent::MatchUpdated { game_id, .. } = event {
//!         let _snapshot = client.match_state(game_id);
//!         // hand the snapshot to the renderer
//!     }
//! }
//! # }
//! ```

mod grid;
pub use grid::{Grid, Position};

mod tile;
pub use tile::BaseTile;

mod food;
pub use food::Food;

mod entity;
pub use entity::{Direction, DynamicMetadata, Entity, EntityKind};

mod message;
pub use message::{
    DeltaMessage, EntityDied, EntityMoved, EntitySpawned, FoodEaten, FoodSpawned,
    LeaderboardEntry, MetadataChanged, OpenMessage, ServerMessage,
};

mod error;
pub use error::DecodeError;

mod decode;
pub use decode::decode_message;

mod state;
pub use state::{DeltaOutcome, MatchState, StateStore};

mod connection;
pub use connection::{
    Backoff, ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, Reconnector,
};

mod client;
pub use client::{ClientConfig, SpectatorClient, SpectatorEvent};
