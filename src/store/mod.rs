//! Persistence gateway contract.
//!
//! The core never talks to a concrete database; it consumes this row-shaped
//! CRUD/query/subscribe interface. Rows travel as `serde_json::Value` and the
//! typed entities in [`crate::types`] are (de)serialized at the call sites.

mod memory;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

pub use memory::MemoryGateway;

/// Result type for gateway operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Games,
    Players,
    Prompts,
    Responses,
    Votes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change delivered to subscribers, at-least-once, with per-row
/// updates in commit order.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub row: Value,
}

#[derive(Debug, Clone)]
enum Clause {
    Eq(String, Value),
    IsNull(String),
}

/// Conjunction of equality / is-null clauses over row fields.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn is_null(mut self, field: &str) -> Self {
        self.clauses.push(Clause::IsNull(field.to_string()));
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, value) => row.get(field) == Some(value),
            Clause::IsNull(field) => {
                matches!(row.get(field), None | Some(Value::Null))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

impl Order {
    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Descending,
        }
    }

    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: Direction::Ascending,
        }
    }
}

/// Live change feed for one `subscribe` call.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// detaches it; the gateway prunes the sender on the next delivery attempt.
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { events }
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Explicit first-class unsubscribe; equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

/// Trait the persistence backend must implement.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Insert a row, returning it as stored.
    async fn insert(&self, table: Table, row: Value) -> StoreResult<Value>;

    /// Fetch exactly one matching row.
    async fn select_one(&self, table: Table, filter: Filter) -> StoreResult<Value>;

    /// Fetch all matching rows, optionally ordered and limited. Without an
    /// explicit order, rows come back in insertion order.
    async fn select_many(
        &self,
        table: Table,
        filter: Filter,
        order: Option<Order>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Value>>;

    /// Merge `patch` fields into every matching row; returns rows affected.
    async fn update(&self, table: Table, filter: Filter, patch: Value) -> StoreResult<u64>;

    /// Subscribe to change events on a table, filtered on the new-row
    /// snapshot.
    async fn subscribe(
        &self,
        table: Table,
        kinds: Vec<EventKind>,
        filter: Filter,
    ) -> StoreResult<Subscription>;
}
