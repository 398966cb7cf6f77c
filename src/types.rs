use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type GameId = String;
pub type PlayerId = String;
pub type PromptId = String;
pub type ResponseId = String;
pub type VoteId = String;
pub type VoterId = String;

/// Lifecycle of a single game session.
///
/// `Created` only exists between row insertion and the session cursor being
/// registered; callers observe games starting at `AwaitingPlayers`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Created,
    AwaitingPlayers,
    PromptReady,
    Submission,
    Voting,
    Scoring,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Players needed before a game is ready to start.
    pub player_quorum: usize,
    /// Points paid per vote received.
    pub points_per_vote: i64,
    /// Flat bonus for the outright winner of a two-response round.
    pub round_win_bonus: i64,
    /// When the game-level top set is tied, pay out every player's total
    /// rather than only the top set.
    pub tie_pays_all_players: bool,
    /// Legacy single-prompt mode: attach a shared prompt to the game at
    /// creation instead of waiting for the player threshold.
    pub auto_assign_prompt_on_create: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            player_quorum: 2,
            points_per_vote: 100,
            round_win_bonus: 50,
            tie_pays_all_players: true,
            auto_assign_prompt_on_create: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub created_at: String,
    /// Shared prompt for legacy single-prompt mode; absent in multi-prompt
    /// games where each player carries their own prompt row.
    pub prompt_id: Option<PromptId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    /// Caller-supplied identity; doubles as the voter id.
    pub id: PlayerId,
    pub username: String,
    pub game_id: GameId,
    pub score: i64,
    /// Legacy single-round bookkeeping; advisory only. Quorum decisions use
    /// distinct voter counts, never this flag.
    pub voted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: PromptId,
    pub text: String,
    /// `None` marks a shared/default prompt reusable across games.
    pub game_id: Option<GameId>,
    /// Set when a player authored or was assigned this prompt.
    pub player_id: Option<PlayerId>,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub prompt_id: PromptId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub response_id: ResponseId,
    pub user_id: VoterId,
    pub game_id: GameId,
    pub prompt_id: PromptId,
}

/// A response joined with its current vote count, for display and scoring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseSummary {
    pub id: ResponseId,
    pub player_id: PlayerId,
    pub text: String,
    pub vote_count: u64,
}

/// One player's share of a scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerAward {
    pub player_id: PlayerId,
    pub votes: u64,
    pub points: i64,
}

/// Result of scoring one two-response round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundOutcome {
    pub tie: bool,
    pub awards: Vec<PlayerAward>,
}

/// Result of the game-level aggregate scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameOutcome {
    pub tie: bool,
    pub winner: Option<PlayerId>,
    pub awards: Vec<PlayerAward>,
}

/// One side of the end-of-round display: a response, its author's name, and
/// the points the round formula yields for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseStanding {
    pub response: ResponseSummary,
    pub username: String,
    pub points_earned: i64,
}

/// Winner/loser pairing for the end-of-round screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundStandings {
    pub winning: ResponseStanding,
    pub losing: ResponseStanding,
}

impl GameOutcome {
    /// Zero-effect outcome for a game with no votes.
    pub fn empty() -> Self {
        Self {
            tie: false,
            winner: None,
            awards: Vec::new(),
        }
    }
}
