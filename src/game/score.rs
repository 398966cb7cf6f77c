use super::{from_row, Coordinator};
use crate::error::{GameError, GameResult};
use crate::store::{Filter, Table};
use crate::types::*;
use serde_json::json;
use std::collections::HashMap;

/// Points for a two-response round.
///
/// Equal counts are a tie and both sides are paid proportionally to their
/// votes. Otherwise the winner receives a flat bonus on top of the
/// proportional payout.
pub fn round_points(config: &GameConfig, count_a: u64, count_b: u64) -> (i64, i64) {
    let base_a = count_a as i64 * config.points_per_vote;
    let base_b = count_b as i64 * config.points_per_vote;

    if count_a == count_b {
        (base_a, base_b)
    } else if count_a > count_b {
        (base_a + config.round_win_bonus, base_b)
    } else {
        (base_a, base_b + config.round_win_bonus)
    }
}

impl Coordinator {
    /// Score one prompt's two-response round and persist the awards.
    ///
    /// Runs under the game lock and is idempotent per (game, prompt): a
    /// second trigger (two "last vote" events racing) gets the recorded
    /// outcome back without awarding again.
    pub async fn score_round(
        &self,
        game_id: &GameId,
        prompt_id: &PromptId,
    ) -> GameResult<RoundOutcome> {
        let lock = self.game_lock(game_id).await;
        let _guard = lock.lock().await;

        let key = (game_id.clone(), prompt_id.clone());
        if let Some(done) = self.scored_rounds.read().await.get(&key) {
            return Ok(done.clone());
        }
        if let Ok(SessionState::Complete) = self.state(game_id).await {
            return Err(GameError::Scoring(format!(
                "game {} is complete, no further awards",
                game_id
            )));
        }

        let rows = self
            .store
            .select_many(
                Table::Responses,
                Filter::new()
                    .eq("game_id", game_id.as_str())
                    .eq("prompt_id", prompt_id.as_str()),
                None,
                None,
            )
            .await?;
        if rows.len() < 2 {
            return Err(GameError::InsufficientResponses(rows.len()));
        }
        let first: Response = from_row(rows[0].clone())?;
        let second: Response = from_row(rows[1].clone())?;

        let tally = self.tally(game_id, prompt_id).await?;
        let count_a = tally.get(&first.id).copied().unwrap_or(0);
        let count_b = tally.get(&second.id).copied().unwrap_or(0);
        let (points_a, points_b) = round_points(&self.config, count_a, count_b);

        let outcome = RoundOutcome {
            tie: count_a == count_b,
            awards: vec![
                PlayerAward {
                    player_id: first.player_id,
                    votes: count_a,
                    points: points_a,
                },
                PlayerAward {
                    player_id: second.player_id,
                    votes: count_b,
                    points: points_b,
                },
            ],
        };

        self.apply_awards(&outcome.awards).await?;
        self.scored_rounds.write().await.insert(key, outcome.clone());
        tracing::info!(
            "scored round for prompt {} in game {} (tie: {})",
            prompt_id,
            game_id,
            outcome.tie
        );

        Ok(outcome)
    }

    /// Game-level aggregate scoring across all prompts and responses.
    ///
    /// Aggregates total votes received per player. A tie at the top pays
    /// every player proportionally; an outright winner is paid the margin
    /// over the runner-up. A game with no votes at all is a zero-effect
    /// success. Idempotent per game: once scored, repeat calls return the
    /// recorded outcome and write nothing.
    pub async fn score_game(&self, game_id: &GameId) -> GameResult<GameOutcome> {
        let lock = self.game_lock(game_id).await;
        let _guard = lock.lock().await;

        if let Some(done) = self.scored_games.read().await.get(game_id) {
            return Ok(done.clone());
        }
        if let Ok(SessionState::Complete) = self.state(game_id).await {
            return Err(GameError::Scoring(format!(
                "game {} is complete, no further awards",
                game_id
            )));
        }

        let votes = self.votes_for_game(game_id).await?;
        if votes.is_empty() {
            return Ok(GameOutcome::empty());
        }
        let responses = self.responses_for_game(game_id).await?;

        let mut vote_counts: HashMap<ResponseId, u64> = HashMap::new();
        for vote in &votes {
            *vote_counts.entry(vote.response_id.clone()).or_insert(0) += 1;
        }

        // Total votes received per player, summed over all their responses.
        let mut totals: HashMap<PlayerId, u64> = HashMap::new();
        for response in &responses {
            let count = vote_counts.get(&response.id).copied().unwrap_or(0);
            *totals.entry(response.player_id.clone()).or_insert(0) += count;
        }

        if totals.is_empty() {
            // Votes referencing no known responses count for nobody.
            return Ok(GameOutcome::empty());
        }

        let max_total = totals.values().copied().max().unwrap_or(0);
        let top_set: Vec<&PlayerId> = totals
            .iter()
            .filter(|(_, total)| **total == max_total)
            .map(|(player, _)| player)
            .collect();

        let outcome = if top_set.len() > 1 {
            let mut awards = Vec::new();
            if self.config.tie_pays_all_players {
                for player in self.players(game_id).await? {
                    let total = totals.get(&player.id).copied().unwrap_or(0);
                    awards.push(PlayerAward {
                        player_id: player.id,
                        votes: total,
                        points: total as i64 * self.config.points_per_vote,
                    });
                }
            } else {
                for player_id in &top_set {
                    awards.push(PlayerAward {
                        player_id: (*player_id).clone(),
                        votes: max_total,
                        points: max_total as i64 * self.config.points_per_vote,
                    });
                }
            }
            awards.sort_by(|a, b| a.player_id.cmp(&b.player_id));
            GameOutcome {
                tie: true,
                winner: None,
                awards,
            }
        } else {
            let winner = top_set[0].clone();
            let runner_up = totals
                .iter()
                .filter(|(player, _)| **player != winner)
                .map(|(_, total)| *total)
                .max()
                .unwrap_or(0);
            let margin = (max_total - runner_up) as i64 * self.config.points_per_vote;

            let awards = if margin > 0 {
                vec![PlayerAward {
                    player_id: winner.clone(),
                    votes: max_total,
                    points: margin,
                }]
            } else {
                Vec::new()
            };
            GameOutcome {
                tie: false,
                winner: Some(winner),
                awards,
            }
        };

        self.apply_awards(&outcome.awards).await?;
        self.scored_games
            .write()
            .await
            .insert(game_id.clone(), outcome.clone());
        tracing::info!("scored game {} (tie: {})", game_id, outcome.tie);

        Ok(outcome)
    }

    /// The serialized end-of-game step.
    ///
    /// Advances `Voting -> Scoring` by compare-and-swap, scores the game,
    /// and completes the session (which tears down all watches). A game
    /// found already sitting in `Scoring` is resumed rather than rejected,
    /// so a settle that failed between the two swaps can be retried. Of two
    /// concurrent callers exactly one completes the game; the other gets
    /// `InvalidTransition` from the final swap and must not retry blindly.
    pub async fn settle_game(&self, game_id: &GameId) -> GameResult<GameOutcome> {
        match self
            .transition(game_id, SessionState::Voting, SessionState::Scoring)
            .await
        {
            Ok(()) => {}
            // An earlier settle got past this swap but not to Complete.
            Err(GameError::InvalidTransition {
                actual: SessionState::Scoring,
                ..
            }) => {}
            Err(e) => return Err(e),
        }
        let outcome = self.score_game(game_id).await?;
        self.transition(game_id, SessionState::Scoring, SessionState::Complete)
            .await?;
        Ok(outcome)
    }

    /// Winner/loser pairing of a game's responses for the results screen.
    ///
    /// Returns `None` until at least two responses exist. Points shown are
    /// what the round formula yields for the two counts.
    pub async fn winning_response(&self, game_id: &GameId) -> GameResult<Option<RoundStandings>> {
        let summaries = self.response_summaries(game_id).await?;
        if summaries.len() < 2 {
            return Ok(None);
        }

        let mut ranked = summaries;
        ranked.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));
        let winning = ranked[0].clone();
        let losing = ranked[1].clone();

        let (winner_points, loser_points) =
            round_points(&self.config, winning.vote_count, losing.vote_count);

        let players = self.players(game_id).await?;
        let username = |id: &PlayerId| {
            players
                .iter()
                .find(|p| p.id == *id)
                .map(|p| p.username.clone())
                .unwrap_or_else(|| "Unknown".to_string())
        };

        Ok(Some(RoundStandings {
            winning: ResponseStanding {
                username: username(&winning.player_id),
                response: winning,
                points_earned: winner_points,
            },
            losing: ResponseStanding {
                username: username(&losing.player_id),
                response: losing,
                points_earned: loser_points,
            },
        }))
    }

    /// Apply score deltas additively to the players' stored scores.
    ///
    /// All current scores are read and validated before the first write, so
    /// a missing player aborts the pass with no partial awards. Zero deltas
    /// are skipped.
    pub(crate) async fn apply_awards(&self, awards: &[PlayerAward]) -> GameResult<()> {
        let mut writes: Vec<(PlayerId, i64)> = Vec::new();
        for award in awards {
            if award.points == 0 {
                continue;
            }
            let player: Player = from_row(
                self.store
                    .select_one(
                        Table::Players,
                        Filter::new().eq("id", award.player_id.as_str()),
                    )
                    .await
                    .map_err(|e| {
                        GameError::Scoring(format!(
                            "reading score of player {} failed: {}",
                            award.player_id, e
                        ))
                    })?,
            )?;
            writes.push((award.player_id.clone(), player.score + award.points));
        }

        for (player_id, new_score) in writes {
            self.store
                .update(
                    Table::Players,
                    Filter::new().eq("id", player_id.as_str()),
                    json!({ "score": new_score }),
                )
                .await
                .map_err(|e| {
                    GameError::Scoring(format!(
                        "writing score of player {} failed: {}",
                        player_id, e
                    ))
                })?;
            tracing::info!("player {} score is now {}", player_id, new_score);
        }

        Ok(())
    }
}
