//! In-memory reference implementations of the persistence ports. They honor
//! the same conflict semantics a relational adapter would (primary-key
//! violation on events, optimistic lock on snapshots, unique constraint on
//! dedup markers), which is what the engine's retry paths exercise in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    domain::{
        event::PositionEvent, keys::PositionKey, snapshot::Snapshot, trade::TradeId,
        upi::UpiGeneration,
    },
    error::StoreError,
};

use super::{
    EventStore, IdempotencyRecord, IdempotencyStore, MarkOutcome, SnapshotStore, StoreResult,
    UpiStore,
};

// ================================================================================================
// Events
// ================================================================================================

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    rows: RwLock<HashMap<PositionKey, BTreeMap<u64, PositionEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: PositionEvent) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let stream = rows.entry(event.position_key.clone()).or_default();
        if stream.contains_key(&event.event_version) {
            return Err(StoreError::VersionConflict {
                key: event.position_key,
                version: event.event_version,
            });
        }
        stream.insert(event.event_version, event);
        Ok(())
    }

    async fn load_all(&self, key: &PositionKey) -> StoreResult<Vec<PositionEvent>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(key)
            .map(|stream| stream.values().cloned().collect())
            .unwrap_or_default())
    }
}

// ================================================================================================
// Snapshots
// ================================================================================================

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    rows: RwLock<HashMap<PositionKey, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self, key: &PositionKey) -> StoreResult<Option<Snapshot>> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn upsert(&self, snapshot: Snapshot, expected_lock: Option<u64>) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let current = rows.get(&snapshot.position_key);
        match (current, expected_lock) {
            (None, None) => {
                rows.insert(snapshot.position_key.clone(), snapshot);
                Ok(())
            }
            (Some(existing), Some(expected)) if existing.opt_lock_version == expected => {
                rows.insert(snapshot.position_key.clone(), snapshot);
                Ok(())
            }
            (existing, expected) => Err(StoreError::OptimisticLockConflict {
                key: snapshot.position_key.clone(),
                expected: expected.unwrap_or(0),
                actual: existing.map(|s| s.opt_lock_version).unwrap_or(0),
            }),
        }
    }
}

// ================================================================================================
// Idempotency
// ================================================================================================

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    rows: RwLock<HashMap<TradeId, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn is_processed(&self, trade_id: &TradeId) -> StoreResult<bool> {
        Ok(self.rows.read().await.contains_key(trade_id))
    }

    async fn mark(&self, record: IdempotencyRecord) -> StoreResult<MarkOutcome> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&record.trade_id) {
            return Ok(MarkOutcome::Duplicate);
        }
        rows.insert(record.trade_id.clone(), record);
        Ok(MarkOutcome::Inserted)
    }
}

// ================================================================================================
// UPI history
// ================================================================================================

#[derive(Debug, Default)]
pub struct InMemoryUpiStore {
    rows: RwLock<HashMap<PositionKey, Vec<UpiGeneration>>>,
}

impl InMemoryUpiStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpiStore for InMemoryUpiStore {
    async fn generations(&self, key: &PositionKey) -> StoreResult<Vec<UpiGeneration>> {
        Ok(self.rows.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn active(&self, key: &PositionKey) -> StoreResult<Option<UpiGeneration>> {
        Ok(self
            .rows
            .read()
            .await
            .get(key)
            .and_then(|gens| gens.iter().rev().find(|g| g.is_active()).cloned()))
    }

    async fn append(&self, generation: UpiGeneration) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let gens = rows.entry(generation.position_key.clone()).or_default();
        if gens.iter().any(|g| g.generation == generation.generation) {
            return Err(StoreError::Unavailable(format!(
                "generation {} already recorded for {}",
                generation.generation, generation.position_key
            )));
        }
        gens.push(generation);
        Ok(())
    }

    async fn terminate_active(&self, key: &PositionKey, at: DateTime<Utc>) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(gens) = rows.get_mut(key) {
            if let Some(active) = gens.iter_mut().rev().find(|g| g.is_active()) {
                active.terminated_at = Some(at);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use crate::domain::{
        event::{EventType, MetaLots},
        trade::{Trade, TradeScope, TradeType},
        units::{Px, Qty},
        upi::Upi,
    };
    use crate::store::ProcessingStatus;

    use super::*;

    fn key() -> PositionKey {
        PositionKey::from_raw("00000000deadbeef")
    }

    fn event(version: u64) -> PositionEvent {
        let trade = Trade {
            trade_id: TradeId(format!("T-{version}")),
            scope: TradeScope::Key {
                position_key: key(),
            },
            trade_type: TradeType::NewTrade,
            quantity: Qty(dec!(100)),
            price: Px(dec!(50.00)),
            effective_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            settlement_date: None,
            settled_quantity: None,
            contract_id: None,
            correlation_id: "corr".into(),
            causation_id: None,
            user_id: None,
        };
        PositionEvent::for_trade(
            key(),
            version,
            EventType::NewTrade,
            trade,
            MetaLots::new(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_event_append_rejects_version_reuse() {
        let store = InMemoryEventStore::new();
        store.append(event(1)).await.unwrap();

        let err = store.append(event(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { version: 1, .. }));

        store.append(event(2)).await.unwrap();
        let all = store.load_all(&key()).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.event_version).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn test_idempotency_mark_is_exactly_once() {
        let store = InMemoryIdempotencyStore::new();
        let record = IdempotencyRecord {
            trade_id: "T-1".into(),
            position_key: key(),
            event_version: 1,
            processed_at: Utc::now(),
            status: ProcessingStatus::Processed,
        };

        assert!(!store.is_processed(&"T-1".into()).await.unwrap());
        assert_eq!(store.mark(record.clone()).await.unwrap(), MarkOutcome::Inserted);
        assert_eq!(store.mark(record).await.unwrap(), MarkOutcome::Duplicate);
        assert!(store.is_processed(&"T-1".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_upi_terminate_then_reopen_tracks_generations() {
        let store = InMemoryUpiStore::new();
        let now = Utc::now();

        store
            .append(UpiGeneration {
                position_key: key(),
                generation: 1,
                upi: Upi("T-1".into()),
                created_at: now,
                terminated_at: None,
            })
            .await
            .unwrap();

        store.terminate_active(&key(), now).await.unwrap();
        assert!(store.active(&key()).await.unwrap().is_none());

        store
            .append(UpiGeneration {
                position_key: key(),
                generation: 2,
                upi: Upi("T-5".into()),
                created_at: now,
                terminated_at: None,
            })
            .await
            .unwrap();

        let active = store.active(&key()).await.unwrap().unwrap();
        assert_eq!(active.generation, 2);
        assert_eq!(store.generations(&key()).await.unwrap().len(), 2);
    }
}
