mod player;
mod prompt;
mod response;
mod score;
mod session;
mod vote;

use crate::error::{GameError, GameResult};
use crate::store::Gateway;
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

pub use player::{PlayerCountEvent, PlayerCountWatch};
pub use response::ResponsesWatch;
pub use score::round_points;
pub use vote::{VoteOutcome, VoteRejection};

/// Coordinates all active game sessions against one persistence gateway.
///
/// The gateway is the only shared mutable resource; the coordinator itself
/// holds the per-game session cursor, the per-game serialization locks, and
/// the scoring idempotency records. Cheap to clone, shared across tasks.
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) store: Arc<dyn Gateway>,
    pub(crate) config: GameConfig,
    /// State-machine cursor per game id.
    pub(crate) sessions: Arc<RwLock<HashMap<GameId, SessionState>>>,
    /// Per-game locks serializing read-then-write critical sections.
    pub(crate) locks: Arc<Mutex<HashMap<GameId, Arc<Mutex<()>>>>>,
    /// Outcomes already paid out, keyed per game and per (game, prompt).
    /// Re-triggering a scoring pass returns the recorded outcome instead of
    /// awarding twice.
    pub(crate) scored_games: Arc<RwLock<HashMap<GameId, GameOutcome>>>,
    pub(crate) scored_rounds: Arc<RwLock<HashMap<(GameId, PromptId), RoundOutcome>>>,
    /// Fan-out channel announcing games that reached `Complete`; every watch
    /// task listens here and terminates for its game.
    pub(crate) completed: broadcast::Sender<GameId>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Gateway>) -> Self {
        Self::with_config(store, GameConfig::default())
    }

    pub fn with_config(store: Arc<dyn Gateway>, config: GameConfig) -> Self {
        let (completed, _rx) = broadcast::channel(64);
        Self {
            store,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(Mutex::new(HashMap::new())),
            scored_games: Arc::new(RwLock::new(HashMap::new())),
            scored_rounds: Arc::new(RwLock::new(HashMap::new())),
            completed,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Receiver for game-completion announcements.
    pub fn completion_feed(&self) -> broadcast::Receiver<GameId> {
        self.completed.subscribe()
    }

    /// The serialization point for one game id. Critical sections that read
    /// derived state and then write (quorum check then scoring) must hold
    /// this lock so concurrent triggers cannot both observe the condition.
    pub(crate) async fn game_lock(&self, game_id: &GameId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(game_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Serialize an entity into a gateway row.
pub(crate) fn to_row<T: Serialize>(entity: &T) -> GameResult<Value> {
    serde_json::to_value(entity)
        .map_err(|e| GameError::Storage(crate::store::StoreError::Backend(e.to_string())))
}

/// Deserialize a gateway row back into an entity.
pub(crate) fn from_row<T: DeserializeOwned>(row: Value) -> GameResult<T> {
    serde_json::from_value(row)
        .map_err(|e| GameError::Storage(crate::store::StoreError::Backend(e.to_string())))
}
