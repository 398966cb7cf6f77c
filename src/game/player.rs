use super::{from_row, to_row, Coordinator};
use crate::error::{GameError, GameResult};
use crate::store::{EventKind, Filter, Order, StoreError, Table};
use crate::types::*;
use futures::Stream;
use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One element of the player-count stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCountEvent {
    /// Current player count; the initial snapshot is always delivered before
    /// any live increment, and increments are strictly +1.
    Count(usize),
    /// The join quorum has been reached. Emitted exactly once, after which
    /// the stream closes.
    Ready,
}

/// Live player-count feed for one game.
///
/// Dropping the handle (or calling [`PlayerCountWatch::unsubscribe`]) cancels
/// the underlying watch task.
#[derive(Debug)]
pub struct PlayerCountWatch {
    events: mpsc::UnboundedReceiver<PlayerCountEvent>,
    task: JoinHandle<()>,
}

impl PlayerCountWatch {
    pub async fn recv(&mut self) -> Option<PlayerCountEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for PlayerCountWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Stream for PlayerCountWatch {
    type Item = PlayerCountEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Coordinator {
    /// Add a player to an explicit game.
    ///
    /// The player row's id is the caller-supplied identity, which also
    /// serves as the voter id later on.
    pub async fn join(
        &self,
        game_id: &GameId,
        username: &str,
        identity: &str,
    ) -> GameResult<Player> {
        if username.trim().is_empty() {
            return Err(GameError::Validation("username"));
        }
        if identity.trim().is_empty() {
            return Err(GameError::Validation("identity"));
        }

        // Resolve the game before inserting; a dangling game id must not
        // create an orphaned player row.
        self.store
            .select_one(Table::Games, Filter::new().eq("id", game_id.as_str()))
            .await
            .map_err(|_| GameError::GameNotFound(game_id.clone()))?;

        let player = Player {
            id: identity.to_string(),
            username: username.to_string(),
            game_id: game_id.clone(),
            score: 0,
            voted: false,
        };
        // The store holds the uniqueness constraint on player ids; a second
        // row for the same identity never lands.
        match self.store.insert(Table::Players, to_row(&player)?).await {
            Ok(_) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(GameError::AlreadyJoined(player.id));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!("user {} joined game {}", player.username, game_id);

        Ok(player)
    }

    /// Join the most recently created game.
    ///
    /// Retained for callers that predate explicit game ids. A missing game is
    /// an error; it is never created implicitly.
    #[deprecated(note = "pass an explicit game id to `join` instead")]
    pub async fn join_latest_game(&self, username: &str, identity: &str) -> GameResult<Player> {
        let game_id = self
            .latest_game_id()
            .await?
            .ok_or_else(|| GameError::GameNotFound("latest".to_string()))?;
        self.join(&game_id, username, identity).await
    }

    /// Id of the most recently created game, if any.
    pub async fn latest_game_id(&self) -> GameResult<Option<GameId>> {
        let rows = self
            .store
            .select_many(
                Table::Games,
                Filter::new(),
                Some(Order::desc("created_at")),
                Some(1),
            )
            .await?;

        match rows.into_iter().next() {
            Some(row) => {
                let game: Game = from_row(row)?;
                Ok(Some(game.id))
            }
            None => Ok(None),
        }
    }

    /// All players of one game, in join order.
    pub async fn players(&self, game_id: &GameId) -> GameResult<Vec<Player>> {
        let rows = self
            .store
            .select_many(
                Table::Players,
                Filter::new().eq("game_id", game_id.as_str()),
                None,
                None,
            )
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Watch the player count of a game until the join quorum is reached.
    ///
    /// Emits the snapshot count first, then one `Count` per live insert, then
    /// a single `Ready` once the quorum is first reached, and closes. The
    /// change subscription is opened before the snapshot read so no insert is
    /// lost in between; inserts already contained in the snapshot are
    /// deduplicated by player id.
    pub async fn watch_player_count(&self, game_id: &GameId) -> GameResult<PlayerCountWatch> {
        // Surface a bad game id at subscribe time, not as a silent dead feed.
        self.store
            .select_one(Table::Games, Filter::new().eq("id", game_id.as_str()))
            .await
            .map_err(|_| GameError::GameNotFound(game_id.clone()))?;

        let mut inserts = self
            .store
            .subscribe(
                Table::Players,
                vec![EventKind::Insert],
                Filter::new().eq("game_id", game_id.as_str()),
            )
            .await?;

        let snapshot = self.players(game_id).await?;
        let mut seen: HashSet<PlayerId> = snapshot.into_iter().map(|p| p.id).collect();
        let mut count = seen.len();

        let quorum = self.config.player_quorum;
        let mut completed = self.completed.subscribe();
        let game_id = game_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            if tx.send(PlayerCountEvent::Count(count)).is_err() {
                return;
            }
            if count >= quorum {
                let _ = tx.send(PlayerCountEvent::Ready);
                return;
            }

            loop {
                tokio::select! {
                    event = inserts.recv() => {
                        let Some(event) = event else { break };
                        let Some(id) = event.row.get("id").and_then(|v| v.as_str()) else {
                            continue;
                        };
                        if !seen.insert(id.to_string()) {
                            continue;
                        }
                        count += 1;
                        if tx.send(PlayerCountEvent::Count(count)).is_err() {
                            break;
                        }
                        if count >= quorum {
                            let _ = tx.send(PlayerCountEvent::Ready);
                            break;
                        }
                    }
                    done = completed.recv() => {
                        match done {
                            Ok(id) if id == game_id => break,
                            Ok(_) => continue,
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(PlayerCountWatch { events: rx, task })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_join_requires_username_and_identity() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();

        let result = coordinator.join(&game.id, "", "user-1").await;
        assert!(matches!(result, Err(GameError::Validation("username"))));

        let result = coordinator.join(&game.id, "alice", "  ").await;
        assert!(matches!(result, Err(GameError::Validation("identity"))));
    }

    #[tokio::test]
    async fn test_join_unknown_game() {
        let coordinator = coordinator();
        let result = coordinator.join(&"missing".to_string(), "alice", "user-1").await;
        assert!(matches!(result, Err(GameError::GameNotFound(_))));
    }

    #[tokio::test]
    async fn test_join_creates_player_with_zero_score() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();

        let player = coordinator.join(&game.id, "alice", "user-1").await.unwrap();
        assert_eq!(player.id, "user-1");
        assert_eq!(player.score, 0);
        assert!(!player.voted);

        let players = coordinator.players(&game.id).await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].username, "alice");
    }

    #[tokio::test]
    async fn test_join_rejects_duplicate_identity() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();
        let other = coordinator.create_game().await.unwrap();
        coordinator.join(&game.id, "alice", "user-1").await.unwrap();

        // Same identity again, in the same game or another one: rejected,
        // and no second player row appears.
        let result = coordinator.join(&game.id, "alice", "user-1").await;
        assert!(matches!(result, Err(GameError::AlreadyJoined(id)) if id == "user-1"));
        let result = coordinator.join(&other.id, "alice2", "user-1").await;
        assert!(matches!(result, Err(GameError::AlreadyJoined(_))));

        assert_eq!(coordinator.players(&game.id).await.unwrap().len(), 1);
        assert!(coordinator.players(&other.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_latest_game_resolves_most_recent() {
        let coordinator = coordinator();
        let _older = coordinator.create_game().await.unwrap();
        let newer = coordinator.create_game().await.unwrap();

        #[allow(deprecated)]
        let player = coordinator.join_latest_game("bob", "user-2").await.unwrap();
        assert_eq!(player.game_id, newer.id);
    }

    #[tokio::test]
    async fn test_join_latest_game_without_games_is_an_error() {
        let coordinator = coordinator();

        // No game gets silently created on this path anymore.
        #[allow(deprecated)]
        let result = coordinator.join_latest_game("bob", "user-2").await;
        assert!(matches!(result, Err(GameError::GameNotFound(_))));
        assert_eq!(coordinator.latest_game_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_player_count_snapshot_then_increments() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();
        coordinator.join(&game.id, "alice", "user-1").await.unwrap();

        let mut watch = coordinator.watch_player_count(&game.id).await.unwrap();
        assert_eq!(watch.recv().await, Some(PlayerCountEvent::Count(1)));

        coordinator.join(&game.id, "bob", "user-2").await.unwrap();
        assert_eq!(watch.recv().await, Some(PlayerCountEvent::Count(2)));
        assert_eq!(watch.recv().await, Some(PlayerCountEvent::Ready));
        assert_eq!(watch.recv().await, None);
    }

    #[tokio::test]
    async fn test_watch_player_count_ready_immediately_at_quorum() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();
        coordinator.join(&game.id, "alice", "user-1").await.unwrap();
        coordinator.join(&game.id, "bob", "user-2").await.unwrap();

        let mut watch = coordinator.watch_player_count(&game.id).await.unwrap();
        assert_eq!(watch.recv().await, Some(PlayerCountEvent::Count(2)));
        assert_eq!(watch.recv().await, Some(PlayerCountEvent::Ready));
        assert_eq!(watch.recv().await, None);
    }

    #[tokio::test]
    async fn test_watch_player_count_ignores_other_games() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();
        let other = coordinator.create_game().await.unwrap();

        let mut watch = coordinator.watch_player_count(&game.id).await.unwrap();
        assert_eq!(watch.recv().await, Some(PlayerCountEvent::Count(0)));

        coordinator.join(&other.id, "carol", "user-3").await.unwrap();
        coordinator.join(&game.id, "alice", "user-1").await.unwrap();
        assert_eq!(watch.recv().await, Some(PlayerCountEvent::Count(1)));
    }

    #[tokio::test]
    async fn test_watch_player_count_unknown_game() {
        let coordinator = coordinator();
        let result = coordinator.watch_player_count(&"missing".to_string()).await;
        assert!(matches!(result, Err(GameError::GameNotFound(_))));
    }
}
