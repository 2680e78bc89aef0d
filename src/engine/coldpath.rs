//! The coldpath replayer: folds a backdated trade into its chronological
//! place by replaying the whole event stream and overwriting the snapshot
//! with the reconciled result. Pre-existing events are never rewritten or
//! deleted; the reconciliation only appends.

use std::time::Instant;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    domain::{
        event::{EventPayload, EventType, HistoricalCorrection, PositionEvent},
        keys::Direction,
        position::PositionStatus,
        snapshot::{CompressedLots, ReconciliationStatus, Snapshot, SummaryMetrics},
        trade::{Trade, TradeScope},
        upi::Upi,
    },
    error::{StoreError, SwapbookError, SwapbookResult, SystemError},
    store::{IdempotencyRecord, ProcessingStatus},
    transport::Topic,
};

use super::{
    ctx::Ctx,
    replay::{self, ReplayEntry},
    PositionEngine, ReplayOutcome,
};

impl PositionEngine {
    /// Reconciles one backdated trade: inserts it as a new event at the
    /// next-max version, replays the full stream in (effective_date,
    /// event_version) order, overwrites the snapshot, and emits a
    /// historical correction.
    ///
    /// Events carrying the same effective date as the backdated trade keep
    /// their place ahead of it: the new event always takes the highest
    /// version, and replay breaks date ties by version.
    #[tracing::instrument(skip(self, ctx, trade), fields(trade = %trade.trade_id, corr = %ctx.correlation_id))]
    pub async fn reconcile(&self, ctx: &Ctx, trade: &Trade) -> SwapbookResult<ReplayOutcome> {
        let key = trade.position_key();
        let started = Instant::now();
        let _guard = self.locks.acquire(&key).await;

        // Set once the new event row is durable, so an optimistic redo does
        // not mistake our own insert for a prior reconciliation.
        let mut inserted_version: Option<u64> = None;

        loop {
            if started.elapsed() > self.config.cold_replay_budget {
                let message = format!(
                    "reconciliation of {} exceeded its {}s budget",
                    trade.trade_id,
                    self.config.cold_replay_budget.as_secs()
                );
                warn!(%key, "{message}");
                self.dead_letter(
                    key.clone(),
                    &trade.correlation_id,
                    "retryable_error",
                    &message,
                    serde_json::to_value(trade).unwrap_or_default(),
                )
                .await;
                return Err(StoreError::Timeout.into());
            }

            let events = self.cold(self.events.load_all(&key)).await?;

            let existing = events.iter().find(|e| {
                e.event_type != EventType::ProvisionalApplied
                    && e.trade_id() == Some(&trade.trade_id)
            });
            if existing.is_some() && inserted_version.is_none() {
                info!(%key, "trade already reconciled");
                return Ok(ReplayOutcome::AlreadyReconciled);
            }

            let prior = self.cold(self.snapshots.load(&key)).await?;
            let direction = resolve_direction(trade, prior.as_ref(), &events)?;
            let currency = Self::currency_for(trade, prior.as_ref());

            let max_version = events.iter().map(|e| e.event_version).max().unwrap_or(0);
            let candidate_version = inserted_version.unwrap_or(max_version + 1);
            let candidate_payload = EventPayload::Trade {
                trade: trade.clone(),
            };

            // Replay list: all persisted non-provisional events, plus the
            // backdated trade when its row is not durable yet, ordered by
            // (effective_date, event_version).
            let mut entries: Vec<ReplayEntry<'_>> = events
                .iter()
                .filter(|e| e.event_type != EventType::ProvisionalApplied)
                .map(|e| ReplayEntry {
                    effective_date: e.effective_date,
                    event_version: e.event_version,
                    payload: &e.payload,
                })
                .collect();
            if inserted_version.is_none() {
                entries.push(ReplayEntry {
                    effective_date: trade.effective_date,
                    event_version: candidate_version,
                    payload: &candidate_payload,
                });
            }
            entries.sort_by_key(|e| (e.effective_date, e.event_version));

            let result = match replay::replay(
                &key,
                direction,
                &self.config.schedule_unit,
                currency,
                &entries,
                Some(candidate_version),
                self.rules.as_ref(),
            )
            .await
            {
                Ok(result) => result,
                Err(fatal) => {
                    self.dead_letter(
                        key.clone(),
                        &trade.correlation_id,
                        fatal.code(),
                        &fatal.to_string(),
                        serde_json::to_value(trade).unwrap_or_default(),
                    )
                    .await;
                    return Err(fatal);
                }
            };

            if inserted_version.is_none() {
                let event = PositionEvent::for_trade(
                    key.clone(),
                    candidate_version,
                    Self::event_type_for(trade.trade_type),
                    trade.clone(),
                    result.candidate_allocations.clone(),
                    ctx.occurred_at,
                );
                match self.cold(self.events.append(event)).await {
                    Ok(()) => inserted_version = Some(candidate_version),
                    Err(SwapbookError::Store(StoreError::VersionConflict { .. })) => {
                        sleep(self.config.backoff_base).await;
                        continue;
                    }
                    Err(other) => return Err(other),
                }
            }

            let upi = match self.cold(self.upis.active(&key)).await? {
                Some(generation) => generation.upi,
                None => result
                    .upi
                    .clone()
                    .unwrap_or_else(|| Upi::from_opening_trade(&trade.trade_id)),
            };
            let status = if result.state.is_flat() {
                PositionStatus::Terminated
            } else {
                PositionStatus::Active
            };

            let before = prior
                .as_ref()
                .map(|s| s.summary.clone())
                .unwrap_or_else(SummaryMetrics::empty);
            let summary = SummaryMetrics::from_state(
                &result.state,
                result.realized_pnl,
                result.last_effective_date,
            );

            let last_version = events
                .iter()
                .map(|e| e.event_version)
                .max()
                .unwrap_or(0)
                .max(candidate_version);

            let reconciled = Snapshot {
                position_key: key.clone(),
                account: prior.as_ref().and_then(|s| s.account.clone()),
                instrument: prior.as_ref().and_then(|s| s.instrument.clone()),
                currency: prior.as_ref().and_then(|s| s.currency.clone()),
                direction,
                contract_id: prior.as_ref().and_then(|s| s.contract_id.clone()),
                last_version,
                upi,
                status,
                reconciliation_status: ReconciliationStatus::Reconciled,
                provisional_trade_id: None,
                lots: CompressedLots::compress(&result.state),
                summary: summary.clone(),
                schedule: result.schedule,
                opt_lock_version: prior.as_ref().map(|s| s.opt_lock_version + 1).unwrap_or(1),
                last_updated_at: ctx.occurred_at,
                archival_flag: prior.as_ref().map(|s| s.archival_flag).unwrap_or(false),
                archived_at: prior.as_ref().and_then(|s| s.archived_at),
            };

            let expected = prior.as_ref().map(|s| s.opt_lock_version);
            match self
                .cold(self.snapshots.upsert(reconciled.clone(), expected))
                .await
            {
                Ok(()) => {}
                Err(SwapbookError::Store(StoreError::OptimisticLockConflict { .. })) => {
                    // A hot write slipped in between our loads; redo against
                    // the fresh stream. The inserted event stays.
                    warn!(%key, "snapshot moved during reconciliation, replaying again");
                    continue;
                }
                Err(other) => return Err(other),
            }

            self.cold(self.idempotency.mark(IdempotencyRecord {
                trade_id: trade.trade_id.clone(),
                position_key: key.clone(),
                event_version: candidate_version,
                processed_at: ctx.occurred_at,
                status: ProcessingStatus::Processed,
            }))
            .await?;

            let correction = HistoricalCorrection::new(
                key.clone(),
                trade.trade_id.clone(),
                ctx.correlation_id.clone(),
                before,
                summary,
                ctx.occurred_at,
            );
            self.publish(Topic::HistoricalCorrected, &key, &correction, ctx)
                .await?;
            info!(
                %key,
                version = candidate_version,
                generations = result.generations,
                delta = %correction.quantity_delta,
                "backdated trade reconciled"
            );

            return Ok(ReplayOutcome::Reconciled {
                snapshot: reconciled,
                correction,
            });
        }
    }
}

/// Direction of the key being replayed: the snapshot knows it; failing that
/// the trade or any stored event carries the addressing tuple.
fn resolve_direction(
    trade: &Trade,
    snapshot: Option<&Snapshot>,
    events: &[PositionEvent],
) -> SwapbookResult<Direction> {
    if let Some(s) = snapshot {
        return Ok(s.direction);
    }
    if let TradeScope::Parts { direction, .. } = &trade.scope {
        return Ok(*direction);
    }
    for event in events {
        if let Some(t) = event.payload.trade() {
            if let TradeScope::Parts { direction, .. } = &t.scope {
                return Ok(*direction);
            }
        }
    }
    Err(SystemError::MissingField(format!(
        "cannot resolve direction for {}",
        trade.position_key()
    ))
    .into())
}
