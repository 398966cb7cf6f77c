use super::{ChangeEvent, EventKind, Filter, Gateway, Order, StoreError, StoreResult, Subscription, Table};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// Columns that must be unique together, per table. The votes constraint is
/// the storage-level invariant that keeps a voter from being counted twice
/// for the same prompt, regardless of caller discipline. Player rows are
/// keyed by the caller-supplied identity, so one identity maps to at most
/// one player row.
fn unique_keys(table: Table) -> &'static [&'static [&'static str]] {
    match table {
        Table::Votes => &[&["user_id", "prompt_id"]],
        Table::Players => &[&["id"]],
        _ => &[],
    }
}

struct Subscriber {
    table: Table,
    kinds: Vec<EventKind>,
    filter: Filter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

/// In-process gateway backend.
///
/// Rows live in insertion-ordered vectors behind an async `RwLock`; change
/// events fan out to subscribers on every committed insert/update. Used as
/// the test backend and as a single-process store.
#[derive(Default)]
pub struct MemoryGateway {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    async fn notify(&self, table: Table, kind: EventKind, row: &Value) {
        let mut subscribers = self.subscribers.write().await;
        // Prune subscribers whose receiving end has been dropped.
        subscribers.retain(|sub| {
            if sub.table != table || !sub.kinds.contains(&kind) || !sub.filter.matches(row) {
                return !sub.tx.is_closed();
            }
            sub.tx
                .send(ChangeEvent {
                    kind,
                    row: row.clone(),
                })
                .is_ok()
        });
    }

    fn violates_unique(table: Table, rows: &[Value], candidate: &Value) -> Option<String> {
        for key in unique_keys(table) {
            let clash = rows.iter().any(|existing| {
                key.iter()
                    .all(|field| existing.get(*field) == candidate.get(*field))
            });
            if clash {
                return Some(key.join(", "));
            }
        }
        None
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn insert(&self, table: Table, row: Value) -> StoreResult<Value> {
        {
            let mut tables = self.tables.write().await;
            let rows = tables.entry(table).or_default();
            if let Some(key) = Self::violates_unique(table, rows, &row) {
                return Err(StoreError::Conflict(key));
            }
            rows.push(row.clone());
        }
        self.notify(table, EventKind::Insert, &row).await;
        Ok(row)
    }

    async fn select_one(&self, table: Table, filter: Filter) -> StoreResult<Value> {
        let tables = self.tables.read().await;
        tables
            .get(&table)
            .and_then(|rows| rows.iter().find(|row| filter.matches(row)))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn select_many(
        &self,
        table: Table,
        filter: Filter,
        order: Option<Order>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let ordering = compare_values(
                    a.get(&order.field).unwrap_or(&Value::Null),
                    b.get(&order.field).unwrap_or(&Value::Null),
                );
                match order.direction {
                    super::Direction::Ascending => ordering,
                    super::Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn update(&self, table: Table, filter: Filter, patch: Value) -> StoreResult<u64> {
        let patch = patch
            .as_object()
            .ok_or_else(|| StoreError::Backend("update patch must be an object".to_string()))?
            .clone();

        let updated: Vec<Value> = {
            let mut tables = self.tables.write().await;
            let rows = tables.entry(table).or_default();
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                if let Some(fields) = row.as_object_mut() {
                    for (key, value) in &patch {
                        fields.insert(key.clone(), value.clone());
                    }
                    updated.push(row.clone());
                }
            }
            updated
        };

        for row in &updated {
            self.notify(table, EventKind::Update, row).await;
        }

        Ok(updated.len() as u64)
    }

    async fn subscribe(
        &self,
        table: Table,
        kinds: Vec<EventKind>,
        filter: Filter,
    ) -> StoreResult<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(Subscriber {
            table,
            kinds,
            filter,
            tx,
        });
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_and_select_one() {
        let store = MemoryGateway::new();
        store
            .insert(Table::Games, json!({"id": "g1", "created_at": "2026-01-01T00:00:00Z"}))
            .await
            .unwrap();

        let row = store
            .select_one(Table::Games, Filter::new().eq("id", "g1"))
            .await
            .unwrap();
        assert_eq!(row["id"], "g1");

        let missing = store
            .select_one(Table::Games, Filter::new().eq("id", "nope"))
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_vote_uniqueness_constraint() {
        let store = MemoryGateway::new();
        let vote = json!({"id": "v1", "user_id": "u1", "prompt_id": "p1", "game_id": "g1"});
        store.insert(Table::Votes, vote).await.unwrap();

        // Same voter, same prompt: rejected even with a fresh vote id.
        let dup = json!({"id": "v2", "user_id": "u1", "prompt_id": "p1", "game_id": "g1"});
        let result = store.insert(Table::Votes, dup).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        // Same voter, different prompt: fine.
        let other = json!({"id": "v3", "user_id": "u1", "prompt_id": "p2", "game_id": "g1"});
        assert!(store.insert(Table::Votes, other).await.is_ok());
    }

    #[tokio::test]
    async fn test_player_id_uniqueness_constraint() {
        let store = MemoryGateway::new();
        store
            .insert(Table::Players, json!({"id": "u1", "game_id": "g1"}))
            .await
            .unwrap();

        // Same identity again, even for another game: rejected.
        let dup = json!({"id": "u1", "game_id": "g2"});
        let result = store.insert(Table::Players, dup).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        let other = json!({"id": "u2", "game_id": "g1"});
        assert!(store.insert(Table::Players, other).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_patches_matching_rows() {
        let store = MemoryGateway::new();
        store
            .insert(Table::Players, json!({"id": "u1", "score": 0, "voted": false}))
            .await
            .unwrap();

        let affected = store
            .update(
                Table::Players,
                Filter::new().eq("id", "u1"),
                json!({"score": 100}),
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let row = store
            .select_one(Table::Players, Filter::new().eq("id", "u1"))
            .await
            .unwrap();
        assert_eq!(row["score"], 100);
        assert_eq!(row["voted"], false);
    }

    #[tokio::test]
    async fn test_select_many_order_and_limit() {
        let store = MemoryGateway::new();
        for (id, ts) in [("a", "2026-01-01"), ("b", "2026-01-03"), ("c", "2026-01-02")] {
            store
                .insert(Table::Games, json!({"id": id, "created_at": ts}))
                .await
                .unwrap();
        }

        let latest = store
            .select_many(Table::Games, Filter::new(), Some(Order::desc("created_at")), Some(1))
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0]["id"], "b");
    }

    #[tokio::test]
    async fn test_subscribe_receives_filtered_inserts() {
        let store = MemoryGateway::new();
        let mut sub = store
            .subscribe(
                Table::Players,
                vec![EventKind::Insert],
                Filter::new().eq("game_id", "g1"),
            )
            .await
            .unwrap();

        store
            .insert(Table::Players, json!({"id": "u1", "game_id": "g1"}))
            .await
            .unwrap();
        store
            .insert(Table::Players, json!({"id": "u2", "game_id": "other"}))
            .await
            .unwrap();
        store
            .update(
                Table::Players,
                Filter::new().eq("id", "u1"),
                json!({"voted": true}),
            )
            .await
            .unwrap();

        // Only the matching insert comes through; the update kind was not
        // requested.
        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Insert);
        assert_eq!(event.row["id"], "u1");

        store
            .insert(Table::Players, json!({"id": "u3", "game_id": "g1"}))
            .await
            .unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.row["id"], "u3");
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let store = MemoryGateway::new();
        let sub = store
            .subscribe(Table::Votes, vec![EventKind::Insert], Filter::new())
            .await
            .unwrap();
        sub.unsubscribe();

        store
            .insert(Table::Votes, json!({"id": "v1", "user_id": "u1", "prompt_id": "p1"}))
            .await
            .unwrap();
        assert!(store.subscribers.read().await.is_empty());
    }
}
