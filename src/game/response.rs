use super::{from_row, to_row, Coordinator};
use crate::error::GameResult;
use crate::store::{EventKind, Filter, Table};
use crate::types::*;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Live feed of the current response list (with vote counts) for one game.
/// Re-emits the whole list whenever a response or vote changes.
#[derive(Debug)]
pub struct ResponsesWatch {
    updates: mpsc::UnboundedReceiver<Vec<ResponseSummary>>,
    task: JoinHandle<()>,
}

impl ResponsesWatch {
    pub async fn recv(&mut self) -> Option<Vec<ResponseSummary>> {
        self.updates.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl Drop for ResponsesWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Stream for ResponsesWatch {
    type Item = Vec<ResponseSummary>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.updates.poll_recv(cx)
    }
}

impl Coordinator {
    /// Record one player's response to a prompt.
    ///
    /// One response per (player, prompt) is the caller's contract; nothing is
    /// enforced here and no scoring is triggered.
    pub async fn submit_response(
        &self,
        game_id: &GameId,
        player_id: &PlayerId,
        prompt_id: &PromptId,
        text: &str,
    ) -> GameResult<Response> {
        let response = Response {
            id: ulid::Ulid::new().to_string(),
            game_id: game_id.clone(),
            player_id: player_id.clone(),
            prompt_id: prompt_id.clone(),
            text: text.to_string(),
        };
        self.store
            .insert(Table::Responses, to_row(&response)?)
            .await?;
        Ok(response)
    }

    /// All responses of one game, in submission order.
    pub async fn responses_for_game(&self, game_id: &GameId) -> GameResult<Vec<Response>> {
        let rows = self
            .store
            .select_many(
                Table::Responses,
                Filter::new().eq("game_id", game_id.as_str()),
                None,
                None,
            )
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Responses joined with their current vote counts.
    pub async fn response_summaries(&self, game_id: &GameId) -> GameResult<Vec<ResponseSummary>> {
        let responses = self.responses_for_game(game_id).await?;
        let votes = self
            .store
            .select_many(
                Table::Votes,
                Filter::new().eq("game_id", game_id.as_str()),
                None,
                None,
            )
            .await?;

        let mut counts: HashMap<ResponseId, u64> = HashMap::new();
        for row in votes {
            let vote: Vote = from_row(row)?;
            *counts.entry(vote.response_id).or_insert(0) += 1;
        }

        Ok(responses
            .into_iter()
            .map(|r| ResponseSummary {
                vote_count: counts.get(&r.id).copied().unwrap_or(0),
                id: r.id,
                player_id: r.player_id,
                text: r.text,
            })
            .collect())
    }

    /// Watch the response list of a game.
    ///
    /// Emits the refreshed summary list after every vote or response change.
    /// The feed ends when the game reaches `Complete` or the handle is
    /// dropped.
    pub async fn watch_responses(&self, game_id: &GameId) -> GameResult<ResponsesWatch> {
        let kinds = vec![EventKind::Insert, EventKind::Update, EventKind::Delete];
        let mut vote_changes = self
            .store
            .subscribe(
                Table::Votes,
                kinds.clone(),
                Filter::new().eq("game_id", game_id.as_str()),
            )
            .await?;
        let mut response_changes = self
            .store
            .subscribe(
                Table::Responses,
                kinds,
                Filter::new().eq("game_id", game_id.as_str()),
            )
            .await?;

        let coordinator = self.clone();
        let mut completed = self.completed.subscribe();
        let game_id = game_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = vote_changes.recv() => {
                        if event.is_none() {
                            break;
                        }
                    }
                    event = response_changes.recv() => {
                        if event.is_none() {
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

                match coordinator.response_summaries(&game_id).await {
                    Ok(summaries) => {
                        if tx.send(summaries).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("refreshing responses for game {} failed: {}", game_id, e);
                    }
                }
            }
        });

        Ok(ResponsesWatch { updates: rx, task })
    }
}
