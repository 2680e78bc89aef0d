//! Persistence ports. The engine core depends only on these traits; the
//! in-memory implementations in [`memory`] back the test suite and embedded
//! use, while database adapters live outside the crate.

pub mod locks;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use crate::{
    domain::{
        event::{EventVersion, PositionEvent},
        keys::PositionKey,
        snapshot::Snapshot,
        trade::TradeId,
        upi::UpiGeneration,
    },
    error::StoreError,
};

pub type StoreResult<T> = Result<T, StoreError>;

// ================================================================================================
// Event store
// ================================================================================================

/// Append-only event log, keyed (position_key, event_version).
///
/// Rows are immutable once written; an append on an existing version fails
/// with [`StoreError::VersionConflict`], which is what serializes competing
/// hotpath writers.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: PositionEvent) -> StoreResult<()>;

    /// All events for a position, ordered by event version ascending.
    async fn load_all(&self, key: &PositionKey) -> StoreResult<Vec<PositionEvent>>;
}

// ================================================================================================
// Snapshot store
// ================================================================================================

/// Latest snapshot per position, guarded by an optimistic lock version.
///
/// `expected_lock` is `None` for the first write of a key (the row must not
/// exist yet) and the previously loaded `opt_lock_version` otherwise. The
/// caller constructs the new snapshot with the bumped lock version; the
/// store only verifies and swaps.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, key: &PositionKey) -> StoreResult<Option<Snapshot>>;

    async fn upsert(&self, snapshot: Snapshot, expected_lock: Option<u64>) -> StoreResult<()>;
}

// ================================================================================================
// Idempotency store
// ================================================================================================

/// Processing outcome recorded against a trade id.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Processed,
    Failed,
}

/// One-shot dedup marker, unique on trade id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub trade_id: TradeId,
    pub position_key: PositionKey,
    pub event_version: EventVersion,
    pub processed_at: DateTime<Utc>,
    pub status: ProcessingStatus,
}

/// Result of a mark attempt. A duplicate is a successful no-op, never an
/// error: the uniqueness constraint is the authoritative dedup check during
/// commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Advisory pre-check before any work is done.
    async fn is_processed(&self, trade_id: &TradeId) -> StoreResult<bool>;

    /// Inserts the marker, succeeding exactly once per trade id.
    async fn mark(&self, record: IdempotencyRecord) -> StoreResult<MarkOutcome>;
}

// ================================================================================================
// UPI history store
// ================================================================================================

/// Append-only UPI generation history, keyed (position_key, generation).
#[async_trait]
pub trait UpiStore: Send + Sync {
    async fn generations(&self, key: &PositionKey) -> StoreResult<Vec<UpiGeneration>>;

    /// The generation that has not been terminated, if any.
    async fn active(&self, key: &PositionKey) -> StoreResult<Option<UpiGeneration>>;

    async fn append(&self, generation: UpiGeneration) -> StoreResult<()>;

    /// Stamps `terminated_at` on the active generation. A key without an
    /// active generation is a no-op (replays may close what was never
    /// recorded hot).
    async fn terminate_active(
        &self,
        key: &PositionKey,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;
}
