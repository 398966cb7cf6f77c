use super::{from_row, to_row, Coordinator};
use crate::error::{GameError, GameResult};
use crate::store::{Filter, StoreError, Table};
use crate::types::*;
use serde_json::json;
use std::collections::{HashMap, HashSet};

/// Why a vote was turned away. Rejections are reported to the caller as
/// data, not raised as errors; only gateway failures become `GameError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteRejection {
    /// Voters cannot endorse their own response.
    OwnResponse,
    /// The storage uniqueness constraint on (voter, prompt) already holds a
    /// vote from this voter.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted {
        /// Legacy single-round bookkeeping: whether every player of the game
        /// now carries the `voted` flag.
        all_voted: bool,
    },
    Rejected(VoteRejection),
}

impl Coordinator {
    /// Cast a vote for a response.
    ///
    /// The vote row is authoritative once inserted. The subsequent `voted`
    /// flag update is best-effort bookkeeping: its failure is logged and
    /// never rolls the vote back. Correctness-critical decisions use
    /// [`Coordinator::has_quorum`], not the flag.
    pub async fn cast_vote(
        &self,
        response_id: &ResponseId,
        voter_id: &VoterId,
        game_id: &GameId,
        prompt_id: &PromptId,
    ) -> GameResult<VoteOutcome> {
        let response: Response = from_row(
            self.store
                .select_one(Table::Responses, Filter::new().eq("id", response_id.as_str()))
                .await
                .map_err(|_| GameError::NotFound("response"))?,
        )?;
        if response.player_id == *voter_id {
            return Ok(VoteOutcome::Rejected(VoteRejection::OwnResponse));
        }

        let vote = Vote {
            id: ulid::Ulid::new().to_string(),
            response_id: response_id.clone(),
            user_id: voter_id.clone(),
            game_id: game_id.clone(),
            prompt_id: prompt_id.clone(),
        };
        match self.store.insert(Table::Votes, to_row(&vote)?).await {
            Ok(_) => {}
            Err(StoreError::Conflict(_)) => {
                return Ok(VoteOutcome::Rejected(VoteRejection::Duplicate));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!("user {} voted for response {}", voter_id, response_id);

        if let Err(e) = self
            .store
            .update(
                Table::Players,
                Filter::new().eq("id", voter_id.as_str()),
                json!({ "voted": true }),
            )
            .await
        {
            tracing::warn!("updating voted flag for {} failed: {}", voter_id, e);
        }

        let all_voted = match self.all_voted(game_id).await {
            Ok(all) => all,
            Err(e) => {
                tracing::warn!("counting voted flags for game {} failed: {}", game_id, e);
                false
            }
        };

        Ok(VoteOutcome::Accepted { all_voted })
    }

    /// Whether every player of the game carries the advisory `voted` flag.
    pub async fn all_voted(&self, game_id: &GameId) -> GameResult<bool> {
        let players = self.players(game_id).await?;
        Ok(players.iter().all(|p| p.voted))
    }

    /// Whether at least `needed` distinct voters have voted on this prompt.
    ///
    /// Counts distinct voter ids, not vote rows, so a voter represented more
    /// than once can never inflate the quorum. Monotonic in the vote set.
    pub async fn has_quorum(
        &self,
        game_id: &GameId,
        prompt_id: &PromptId,
        needed: usize,
    ) -> GameResult<bool> {
        let votes = self.votes_for_prompt(game_id, prompt_id).await?;
        let voters: HashSet<&str> = votes.iter().map(|v| v.user_id.as_str()).collect();
        Ok(voters.len() >= needed)
    }

    /// Vote count per response for one prompt.
    pub async fn tally(
        &self,
        game_id: &GameId,
        prompt_id: &PromptId,
    ) -> GameResult<HashMap<ResponseId, u64>> {
        let votes = self.votes_for_prompt(game_id, prompt_id).await?;
        let mut counts = HashMap::new();
        for vote in votes {
            *counts.entry(vote.response_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    pub(crate) async fn votes_for_prompt(
        &self,
        game_id: &GameId,
        prompt_id: &PromptId,
    ) -> GameResult<Vec<Vote>> {
        let rows = self
            .store
            .select_many(
                Table::Votes,
                Filter::new()
                    .eq("game_id", game_id.as_str())
                    .eq("prompt_id", prompt_id.as_str()),
                None,
                None,
            )
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub(crate) async fn votes_for_game(&self, game_id: &GameId) -> GameResult<Vec<Vote>> {
        let rows = self
            .store
            .select_many(
                Table::Votes,
                Filter::new().eq("game_id", game_id.as_str()),
                None,
                None,
            )
            .await?;
        rows.into_iter().map(from_row).collect()
    }
}
