//! The top of the pipeline: wires the connection to the decoder and the
//! state store, and tells subscribers which match changed.

use std::sync::{Arc, RwLock};

use log::{error, warn};
use tokio::sync::mpsc;

use crate::connection::{
    ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager, Reconnector,
};
use crate::decode::decode_message;
use crate::message::{LeaderboardEntry, ServerMessage};
use crate::state::{DeltaOutcome, MatchState, StateStore};

/// How many consecutive undecodable messages are tolerated before the
/// stream is considered unsalvageable and the connection is cycled. A
/// fresh connect makes the server resend an open for every match, which
/// is the only honest way to resynchronize; guessing at alignment inside
/// a broken stream is not.
const MAX_CONSECUTIVE_DECODE_FAILURES: u32 = 10;

/// What subscribers see. The connection variants mirror the lifecycle of
/// the underlying stream; the match variants say which id changed so a
/// consumer can fetch the one snapshot it cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpectatorEvent {
    Connecting,
    /// The stream is up. Any previously open match was dropped: match
    /// state never survives the connection that streamed it.
    Connected,
    /// The reconnecting notice, surfaced at most once per outage.
    Disconnected,
    MatchOpened {
        game_id: u32,
    },
    MatchUpdated {
        game_id: u32,
        /// False when the delta only touched entities, so the food layer
        /// need not be redrawn.
        food_changed: bool,
    },
    MatchClosed {
        game_id: u32,
    },
    /// The match hit a hard inconsistency and was discarded; it comes
    /// back only with a fresh open.
    MatchDesynchronized {
        game_id: u32,
    },
    LeaderboardUpdated,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub connection: ConnectionConfig,
    /// Capacity of the subscriber event channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            connection: ConnectionConfig::default(),
            event_capacity: 64,
        }
    }
}

/// Owns the whole pipeline: connection, decoder and store. Constructed
/// with [`SpectatorClient::start`]; change notifications arrive on the
/// receiver returned alongside it, snapshots are read through the
/// client at any time.
pub struct SpectatorClient {
    store: Arc<RwLock<StateStore>>,
    connection: ConnectionHandle,
    task: tokio::task::JoinHandle<()>,
}

impl SpectatorClient {
    pub fn start(config: ClientConfig) -> (SpectatorClient, mpsc::Receiver<SpectatorEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let store = Arc::new(RwLock::new(StateStore::new()));
        let (connection, connection_rx) = ConnectionManager::start(config.connection);

        let task = tokio::spawn(
            ClientTask {
                store: store.clone(),
                events: event_tx,
                connection_rx,
                reconnector: connection.reconnector(),
                decode_failures: 0,
            }
            .run(),
        );

        (
            SpectatorClient {
                store,
                connection,
                task,
            },
            event_rx,
        )
    }

    /// A point-in-time copy of one match, or None if it is not open.
    pub fn match_state(&self, game_id: u32) -> Option<MatchState> {
        self.store
            .read()
            .expect("state store lock poisoned")
            .match_state(game_id)
            .cloned()
    }

    pub fn match_ids(&self) -> Vec<u32> {
        let store = self.store.read().expect("state store lock poisoned");
        let mut ids: Vec<u32> = store.matches().map(MatchState::game_id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.store
            .read()
            .expect("state store lock poisoned")
            .leaderboard()
            .to_vec()
    }

    /// Shared read access to the store, for consumers that want to poll
    /// generation counters without cloning grids. The client task is the
    /// only writer; hold read guards briefly.
    pub fn store(&self) -> Arc<RwLock<StateStore>> {
        self.store.clone()
    }

    /// Drops the current stream and dials fresh. Also the way to
    /// re-acquire a desynchronized match.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    pub async fn stop(self) {
        self.connection.stop().await;
        let _ = self.task.await;
    }
}

struct ClientTask {
    store: Arc<RwLock<StateStore>>,
    events: mpsc::Sender<SpectatorEvent>,
    connection_rx: mpsc::Receiver<ConnectionEvent>,
    reconnector: Reconnector,
    decode_failures: u32,
}

impl ClientTask {
    async fn run(mut self) {
        while let Some(event) = self.connection_rx.recv().await {
            if let Some(update) = self.handle(event) {
                if self.events.send(update).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Handles one connection event. Synchronous on purpose: each
    /// message is fully decoded and applied before the next is read, so
    /// per-match ordering can never be violated here.
    fn handle(&mut self, event: ConnectionEvent) -> Option<SpectatorEvent> {
        match event {
            ConnectionEvent::Connecting => Some(SpectatorEvent::Connecting),
            ConnectionEvent::Connected => {
                self.decode_failures = 0;
                self.store
                    .write()
                    .expect("state store lock poisoned")
                    .clear_matches();
                Some(SpectatorEvent::Connected)
            }
            ConnectionEvent::Disconnected => Some(SpectatorEvent::Disconnected),
            ConnectionEvent::Message(raw) => self.handle_message(&raw),
        }
    }

    fn handle_message(&mut self, raw: &str) -> Option<SpectatorEvent> {
        let message = match decode_message(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping undecodable message: {}", err);
                self.decode_failures += 1;
                if self.decode_failures >= MAX_CONSECUTIVE_DECODE_FAILURES {
                    error!(
                        "{} undecodable messages in a row, cycling the connection",
                        self.decode_failures
                    );
                    self.decode_failures = 0;
                    self.reconnector.reconnect();
                }
                return None;
            }
        };
        self.decode_failures = 0;

        let mut store = self.store.write().expect("state store lock poisoned");
        match message {
            ServerMessage::Opened(open) => {
                let game_id = open.game_id;
                store
                    .apply_open(open)
                    .then(|| SpectatorEvent::MatchOpened { game_id })
            }
            ServerMessage::Delta(delta) => match store.apply_delta(&delta) {
                DeltaOutcome::Applied { food_changed } => Some(SpectatorEvent::MatchUpdated {
                    game_id: delta.game_id,
                    food_changed,
                }),
                DeltaOutcome::UnknownMatch => None,
                DeltaOutcome::Desynchronized => Some(SpectatorEvent::MatchDesynchronized {
                    game_id: delta.game_id,
                }),
            },
            ServerMessage::Closed { game_id } => store
                .apply_close(game_id)
                .then(|| SpectatorEvent::MatchClosed { game_id }),
            ServerMessage::Leaderboard(entries) => {
                store.set_leaderboard(entries);
                Some(SpectatorEvent::LeaderboardUpdated)
            }
        }
    }
}
