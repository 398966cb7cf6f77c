use crate::store::StoreError;
use crate::types::{GameId, PlayerId, SessionState};

/// Result type for game operations
pub type GameResult<T> = Result<T, GameError>;

/// Errors surfaced by the game core.
///
/// Domain preconditions (`NoPromptsAvailable`, `InsufficientResponses`, ...)
/// are fatal to the current operation only; `Storage` failures may be retried
/// by the caller as a whole operation, the core never retries internally.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("missing or empty required field: {0}")]
    Validation(&'static str),

    #[error("game {0} not found")]
    GameNotFound(GameId),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// The identity already has a player row; one identity maps to at most
    /// one player.
    #[error("player {0} is already registered")]
    AlreadyJoined(PlayerId),

    #[error("storage operation failed: {0}")]
    Storage(#[from] StoreError),

    /// The compare-and-swap on the session cursor lost a race; callers should
    /// re-read the current state rather than blindly retry.
    #[error("invalid transition for game {game_id}: expected {expected:?}, found {actual:?}")]
    InvalidTransition {
        game_id: GameId,
        expected: SessionState,
        actual: SessionState,
    },

    #[error("round has {0} responses, need at least 2")]
    InsufficientResponses(usize),

    #[error("no prompts available in the shared pool")]
    NoPromptsAvailable,

    #[error("no default prompts available for fallback")]
    NoDefaultPromptsAvailable,

    #[error("game {0} has no prompt assigned")]
    PromptNotAssigned(GameId),

    #[error("scoring failed: {0}")]
    Scoring(String),
}
