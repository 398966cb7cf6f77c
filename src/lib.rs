// Core of the PromptClash party game: session state machine, join/quorum
// detection, prompt assignment, vote tallying, and scoring. Persistence and
// change notification are consumed through the gateway contract in `store`.

pub mod error;
pub mod game;
pub mod store;
pub mod types;

pub use error::{GameError, GameResult};
pub use game::Coordinator;
