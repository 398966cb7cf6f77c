use super::{from_row, to_row, Coordinator};
use crate::error::{GameError, GameResult};
use crate::store::{Filter, Table};
use crate::types::*;

impl Coordinator {
    /// Create a new game session.
    ///
    /// The session cursor starts at `AwaitingPlayers`; a prompt is only
    /// attached up front in legacy single-prompt mode
    /// (`GameConfig::auto_assign_prompt_on_create`).
    pub async fn create_game(&self) -> GameResult<Game> {
        let mut game = Game {
            id: ulid::Ulid::new().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            prompt_id: None,
        };

        self.store.insert(Table::Games, to_row(&game)?).await?;
        self.sessions
            .write()
            .await
            .insert(game.id.clone(), SessionState::AwaitingPlayers);
        tracing::info!("created game {}", game.id);

        if self.config.auto_assign_prompt_on_create {
            let prompt = self.assign_random_prompt(&game.id).await?;
            game.prompt_id = Some(prompt.id);
        }

        Ok(game)
    }

    /// Read-only snapshot of a game's session state.
    pub async fn state(&self, game_id: &GameId) -> GameResult<SessionState> {
        self.sessions
            .read()
            .await
            .get(game_id)
            .copied()
            .ok_or_else(|| GameError::GameNotFound(game_id.clone()))
    }

    /// Successor table for the session state machine. Strictly linear; there
    /// is no way back out of `Complete`.
    fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (from, to),
            (Created, AwaitingPlayers)
                | (AwaitingPlayers, PromptReady)
                | (PromptReady, Submission)
                | (Submission, Voting)
                | (Voting, Scoring)
                | (Scoring, Complete)
        )
    }

    /// Compare-and-swap the session cursor.
    ///
    /// Fails with `InvalidTransition` when the current state is not
    /// `expected` (a concurrent trigger already advanced the game) or when
    /// `next` is not a legal successor of `expected`. Exactly one of two
    /// racing callers wins.
    pub async fn transition(
        &self,
        game_id: &GameId,
        expected: SessionState,
        next: SessionState,
    ) -> GameResult<()> {
        let mut sessions = self.sessions.write().await;
        let current = sessions
            .get_mut(game_id)
            .ok_or_else(|| GameError::GameNotFound(game_id.clone()))?;

        if *current != expected || !Self::is_valid_transition(expected, next) {
            return Err(GameError::InvalidTransition {
                game_id: game_id.clone(),
                expected,
                actual: *current,
            });
        }

        *current = next;
        drop(sessions);
        tracing::info!("game {} advanced {:?} -> {:?}", game_id, expected, next);

        if next == SessionState::Complete {
            // Wakes every watch task for this game so it can terminate. No
            // receivers is fine.
            let _ = self.completed.send(game_id.clone());
        }

        Ok(())
    }

    /// Fetch the game row itself.
    pub async fn game(&self, game_id: &GameId) -> GameResult<Game> {
        let row = self
            .store
            .select_one(Table::Games, Filter::new().eq("id", game_id.as_str()))
            .await
            .map_err(|_| GameError::GameNotFound(game_id.clone()))?;
        from_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::error::GameError;
    use crate::types::*;

    #[tokio::test]
    async fn test_create_game_starts_awaiting_players() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();

        assert!(game.prompt_id.is_none());
        assert_eq!(
            coordinator.state(&game.id).await.unwrap(),
            SessionState::AwaitingPlayers
        );

        let stored = coordinator.game(&game.id).await.unwrap();
        assert_eq!(stored.id, game.id);
    }

    #[tokio::test]
    async fn test_auto_assign_prompt_on_create() {
        let coordinator = coordinator_with(GameConfig {
            auto_assign_prompt_on_create: true,
            ..GameConfig::default()
        });
        seed_default_prompt(&coordinator, "Write a slogan for a haunted gym").await;

        let game = coordinator.create_game().await.unwrap();
        assert!(game.prompt_id.is_some());

        let stored = coordinator.game(&game.id).await.unwrap();
        assert_eq!(stored.prompt_id, game.prompt_id);
    }

    #[tokio::test]
    async fn test_auto_assign_fails_on_empty_pool() {
        let coordinator = coordinator_with(GameConfig {
            auto_assign_prompt_on_create: true,
            ..GameConfig::default()
        });

        let result = coordinator.create_game().await;
        assert!(matches!(result, Err(GameError::NoPromptsAvailable)));
    }

    #[tokio::test]
    async fn test_transition_walks_the_happy_path() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();

        use SessionState::*;
        for (from, to) in [
            (AwaitingPlayers, PromptReady),
            (PromptReady, Submission),
            (Submission, Voting),
            (Voting, Scoring),
            (Scoring, Complete),
        ] {
            coordinator.transition(&game.id, from, to).await.unwrap();
            assert_eq!(coordinator.state(&game.id).await.unwrap(), to);
        }
    }

    #[tokio::test]
    async fn test_transition_cas_rejects_stale_expected_state() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();

        coordinator
            .transition(&game.id, SessionState::AwaitingPlayers, SessionState::PromptReady)
            .await
            .unwrap();

        // A second trigger still believing the game is AwaitingPlayers loses.
        let result = coordinator
            .transition(&game.id, SessionState::AwaitingPlayers, SessionState::PromptReady)
            .await;
        assert!(matches!(
            result,
            Err(GameError::InvalidTransition {
                expected: SessionState::AwaitingPlayers,
                actual: SessionState::PromptReady,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_transition_rejects_skipping_states() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();

        let result = coordinator
            .transition(&game.id, SessionState::AwaitingPlayers, SessionState::Voting)
            .await;
        assert!(matches!(result, Err(GameError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_transition_unknown_game() {
        let coordinator = coordinator();
        let result = coordinator
            .transition(
                &"missing".to_string(),
                SessionState::AwaitingPlayers,
                SessionState::PromptReady,
            )
            .await;
        assert!(matches!(result, Err(GameError::GameNotFound(_))));
    }

    #[tokio::test]
    async fn test_completion_is_broadcast() {
        let coordinator = coordinator();
        let game = coordinator.create_game().await.unwrap();
        let mut feed = coordinator.completion_feed();

        use SessionState::*;
        for (from, to) in [
            (AwaitingPlayers, PromptReady),
            (PromptReady, Submission),
            (Submission, Voting),
            (Voting, Scoring),
            (Scoring, Complete),
        ] {
            coordinator.transition(&game.id, from, to).await.unwrap();
        }

        assert_eq!(feed.recv().await.unwrap(), game.id);
    }
}
