use super::{from_row, to_row, Coordinator};
use crate::error::{GameError, GameResult};
use crate::store::{Filter, Table};
use crate::types::*;
use rand::Rng;
use serde_json::json;

impl Coordinator {
    /// Attach a uniformly random shared prompt to the game.
    ///
    /// Draws from the pool of prompts not scoped to any game. Used by the
    /// legacy single-prompt mode where the whole game answers one prompt.
    pub async fn assign_random_prompt(&self, game_id: &GameId) -> GameResult<Prompt> {
        let pool = self
            .store
            .select_many(Table::Prompts, Filter::new().is_null("game_id"), None, None)
            .await?;
        if pool.is_empty() {
            return Err(GameError::NoPromptsAvailable);
        }

        let pick = rand::rng().random_range(0..pool.len());
        let prompt: Prompt = from_row(pool[pick].clone())?;

        self.store
            .update(
                Table::Games,
                Filter::new().eq("id", game_id.as_str()),
                json!({ "prompt_id": prompt.id }),
            )
            .await?;
        tracing::info!("assigned prompt {} to game {}", prompt.id, game_id);

        Ok(prompt)
    }

    /// Record the prompt one player brings into the round.
    ///
    /// Non-blank text becomes an authored prompt scoped to this game and
    /// player. Blank text falls back to a random default, inserted as a fresh
    /// row for this player so the multi-prompt mode keeps one prompt row per
    /// player even when two players draw the same default.
    pub async fn submit_player_prompt(
        &self,
        game_id: &GameId,
        player_id: &PlayerId,
        text: &str,
    ) -> GameResult<Prompt> {
        let trimmed = text.trim();

        let (text, is_default) = if trimmed.is_empty() {
            // Only unscoped defaults qualify; fallback copies made for other
            // players are game-scoped and must not re-enter the pool.
            let pool = self
                .store
                .select_many(
                    Table::Prompts,
                    Filter::new().eq("is_default", true).is_null("game_id"),
                    None,
                    None,
                )
                .await?;
            if pool.is_empty() {
                return Err(GameError::NoDefaultPromptsAvailable);
            }
            let pick = rand::rng().random_range(0..pool.len());
            let fallback: Prompt = from_row(pool[pick].clone())?;
            (fallback.text, true)
        } else {
            (trimmed.to_string(), false)
        };

        let prompt = Prompt {
            id: ulid::Ulid::new().to_string(),
            text,
            game_id: Some(game_id.clone()),
            player_id: Some(player_id.clone()),
            is_default,
        };
        self.store.insert(Table::Prompts, to_row(&prompt)?).await?;
        tracing::info!(
            "player {} brought prompt {} into game {} (default fallback: {})",
            player_id,
            prompt.id,
            game_id,
            is_default
        );

        Ok(prompt)
    }

    /// Resolve the shared prompt attached to a game.
    pub async fn prompt_for_game(&self, game_id: &GameId) -> GameResult<Prompt> {
        let game = self.game(game_id).await?;
        let prompt_id = game
            .prompt_id
            .ok_or_else(|| GameError::PromptNotAssigned(game_id.clone()))?;

        let row = self
            .store
            .select_one(Table::Prompts, Filter::new().eq("id", prompt_id))
            .await
            .map_err(|_| GameError::NotFound("prompt"))?;
        from_row(row)
    }
}
