//! The hotpath apply protocol: per-key serialized load → transition →
//! allocate → append → snapshot, with bounded optimistic retry, plus the
//! provisional handling that shunts backdated trades to the coldpath.

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::{
    domain::{
        event::{EventType, PositionEvent},
        keys::{Direction, PositionKey},
        position::{PositionState, PositionStatus},
        schedule::PriceQuantitySchedule,
        snapshot::{CompressedLots, ReconciliationStatus, Snapshot, SummaryMetrics},
        trade::{Trade, TradeScope, TradeType},
        units::Px,
        upi::{Upi, UpiGeneration},
    },
    error::{
        AllocationError, StoreError, SwapbookError, SwapbookResult, SystemError,
    },
    rules::TaxLotMethod,
    store::{IdempotencyRecord, ProcessingStatus},
    transport::Topic,
};

use super::{
    classifier,
    ctx::Ctx,
    lots,
    machine::{self, MachineState, Transition},
    replay,
    validator, Applied, ApplyOutcome, AllocationResult, PositionEngine,
};

/// Outcome of one locked apply attempt on a single key.
enum HotStep {
    Done(ApplyOutcome),
    /// The trade crosses the zero line; the caller must re-run under both
    /// key locks.
    Flip,
}

impl PositionEngine {
    /// Processes one inbound trade end to end: validate, dedup, classify,
    /// then apply on the hotpath or write a provisional snapshot and route
    /// the trade to the coldpath.
    #[tracing::instrument(skip(self, ctx, trade), fields(trade = %trade.trade_id, corr = %ctx.correlation_id))]
    pub async fn process(&self, ctx: &Ctx, trade: Trade) -> SwapbookResult<ApplyOutcome> {
        if let Err(rejection) = validator::validate(&trade, &self.config, ctx.as_of) {
            warn!(reason = %rejection, "trade rejected");
            self.dead_letter(
                trade.position_key(),
                &trade.correlation_id,
                "validation_failed",
                &rejection.to_string(),
                serde_json::to_value(&trade).unwrap_or_default(),
            )
            .await;
            return Err(rejection.into());
        }

        // Advisory check; the unique constraint at commit stays authoritative.
        if self.hot(self.idempotency.is_processed(&trade.trade_id)).await? {
            debug!("duplicate trade, skipping");
            return Ok(ApplyOutcome::AlreadyProcessed);
        }

        let key = trade.position_key();
        {
            let _guard = self.locks.acquire(&key).await;
            if let HotStep::Done(outcome) = self.apply_on_key(ctx, &key, &trade, true).await? {
                return Ok(outcome);
            }
        }
        // Direction change: re-enter under both key locks.
        self.apply_flip(ctx, &key, trade).await
    }

    /// Applies a market-data reference price reset to every open lot of a
    /// position, as a first-class RESET event.
    #[tracing::instrument(skip(self, ctx), fields(key = %key))]
    pub async fn apply_price_reset(
        &self,
        ctx: &Ctx,
        key: &PositionKey,
        effective_date: NaiveDate,
        price: Px,
    ) -> SwapbookResult<Snapshot> {
        let _guard = self.locks.acquire(key).await;

        let snapshot = self
            .hot(self.snapshots.load(key))
            .await?
            .ok_or_else(|| SystemError::MissingField(format!("no snapshot for {key}")))?;
        let mut state = snapshot.inflate()?;
        lots::reset_prices(&mut state, price);

        let version = snapshot.last_version + 1;
        let event = PositionEvent::for_reset(
            key.clone(),
            version,
            effective_date,
            price,
            ctx.correlation_id.clone(),
            ctx.occurred_at,
        );
        self.hot(self.events.append(event.clone())).await?;

        let mut schedule = snapshot.schedule.clone();
        schedule.upsert(replay::schedule_entry_for(&state, effective_date, price));
        let summary = SummaryMetrics::from_state(
            &state,
            snapshot.summary.realized_pnl,
            Some(effective_date),
        );

        let new_snapshot = Snapshot {
            last_version: version,
            lots: CompressedLots::compress(&state),
            summary,
            schedule,
            opt_lock_version: snapshot.opt_lock_version + 1,
            last_updated_at: ctx.occurred_at,
            ..snapshot.clone()
        };
        self.checked_snapshot_swap(new_snapshot.clone(), Some(snapshot.opt_lock_version))
            .await?;

        self.publish(Topic::TradeApplied, key, &event, ctx).await?;
        Ok(new_snapshot)
    }

    // ============================================================================
    // Single-key apply with bounded optimistic retry
    // ============================================================================

    async fn apply_on_key(
        &self,
        ctx: &Ctx,
        key: &PositionKey,
        trade: &Trade,
        flip_allowed: bool,
    ) -> SwapbookResult<HotStep> {
        let mut last_conflict: Option<StoreError> = None;

        for attempt in 0..=self.backoff.max_retries() {
            if attempt > 0 {
                let delay = self.backoff.delay(attempt).unwrap_or_default();
                debug!(attempt, ?delay, "retrying after version conflict");
                tokio::time::sleep(delay).await;
            }

            match self.try_apply_once(ctx, key, trade, flip_allowed).await {
                Err(SwapbookError::Store(conflict @ StoreError::VersionConflict { .. })) => {
                    last_conflict = Some(conflict);
                }
                other => return other,
            }
        }

        warn!(%key, trade = %trade.trade_id, "optimistic retries exhausted");
        Err(last_conflict
            .map(SwapbookError::from)
            .unwrap_or_else(|| {
                SystemError::InvariantViolation("retry loop ended without a conflict".into()).into()
            }))
    }

    async fn try_apply_once(
        &self,
        ctx: &Ctx,
        key: &PositionKey,
        trade: &Trade,
        flip_allowed: bool,
    ) -> SwapbookResult<HotStep> {
        let snapshot = self.hot(self.snapshots.load(key)).await?;

        let timing = classifier::classify(
            trade.effective_date,
            ctx.as_of,
            snapshot.as_ref().and_then(|s| s.summary.last_event_date),
        );
        if timing.is_backdated() {
            let snapshot = snapshot.ok_or_else(|| {
                SystemError::InvariantViolation("backdated classification without history".into())
            })?;
            return self
                .apply_provisional(ctx, key, trade, snapshot)
                .await
                .map(HotStep::Done);
        }

        let machine_state = MachineState::from_snapshot(snapshot.as_ref());
        let direction = Self::direction_for(trade, snapshot.as_ref());
        let mut state = match &snapshot {
            Some(s) => s.inflate()?,
            None => PositionState::new(direction),
        };
        let open_qty = state.total_qty();

        let transition =
            match machine::evaluate(machine_state, trade.trade_type, trade.quantity, open_qty) {
                Ok(transition) => transition,
                Err(invalid) => {
                    self.dead_letter(
                        key.clone(),
                        &trade.correlation_id,
                        "state_machine_invalid",
                        &invalid.to_string(),
                        serde_json::to_value(trade).unwrap_or_default(),
                    )
                    .await;
                    return Err(invalid.into());
                }
            };

        if matches!(transition, Transition::DirectionChange { .. }) {
            let addressable = matches!(trade.scope, TradeScope::Parts { .. })
                || snapshot.as_ref().is_some_and(|s| {
                    s.account.is_some() && s.instrument.is_some() && s.currency.is_some()
                });
            if flip_allowed && addressable {
                return Ok(HotStep::Flip);
            }
            // Without the addressing tuple the opposite-direction key cannot
            // be derived; the trade simply over-draws this position.
            let short = AllocationError::InsufficientQuantity {
                requested: trade.quantity.to_string(),
                available: open_qty.to_string(),
            };
            self.dead_letter(
                key.clone(),
                &trade.correlation_id,
                "insufficient_quantity",
                &short.to_string(),
                serde_json::to_value(trade).unwrap_or_default(),
            )
            .await;
            return Err(short.into());
        }

        let (event_type, allocation, status) = self.mutate(&mut state, &transition, trade).await?;

        let version = snapshot.as_ref().map(|s| s.last_version + 1).unwrap_or(1);
        let event = PositionEvent::for_trade(
            key.clone(),
            version,
            event_type,
            trade.clone(),
            allocation.allocations.clone(),
            ctx.occurred_at,
        );
        self.hot(self.events.append(event.clone())).await?;

        let upi = self
            .upi_for_transition(ctx, key, &transition, trade, snapshot.as_ref())
            .await?;

        let realized = snapshot
            .as_ref()
            .map(|s| s.summary.realized_pnl)
            .unwrap_or_default()
            + allocation.total_realized_pnl;
        let mut schedule = snapshot.as_ref().map(|s| s.schedule.clone()).unwrap_or_else(|| {
            PriceQuantitySchedule::new(
                &self.config.schedule_unit,
                Self::currency_for(trade, snapshot.as_ref()),
            )
        });
        schedule.upsert(replay::schedule_entry_for(
            &state,
            trade.effective_date,
            trade.price,
        ));
        let summary = SummaryMetrics::from_state(&state, realized, Some(trade.effective_date));

        let expected_lock = snapshot.as_ref().map(|s| s.opt_lock_version);
        let new_snapshot = self.build_snapshot(
            ctx,
            key,
            trade,
            snapshot.as_ref(),
            direction,
            version,
            upi,
            status,
            state,
            summary,
            schedule,
        );
        self.checked_snapshot_swap(new_snapshot.clone(), expected_lock)
            .await?;

        // A duplicate marker here means someone beat us to this trade id;
        // the constraint is authoritative and the apply still succeeded.
        self.hot(self.idempotency.mark(IdempotencyRecord {
            trade_id: trade.trade_id.clone(),
            position_key: key.clone(),
            event_version: version,
            processed_at: ctx.occurred_at,
            status: ProcessingStatus::Processed,
        }))
        .await?;

        self.publish(Topic::TradeApplied, key, &event, ctx).await?;
        info!(%key, version, event = %event.event_type, "trade applied");

        Ok(HotStep::Done(ApplyOutcome::Applied(Box::new(Applied {
            snapshot: new_snapshot,
            event,
            allocation,
        }))))
    }

    async fn mutate(
        &self,
        state: &mut PositionState,
        transition: &Transition,
        trade: &Trade,
    ) -> SwapbookResult<(EventType, AllocationResult, PositionStatus)> {
        match transition {
            Transition::Open | Transition::Reopen => {
                let allocation = lots::add_lot(
                    state,
                    trade.trade_id.0.as_str().into(),
                    trade.effective_date,
                    trade.settlement_date_or_default(),
                    trade.quantity,
                    trade.price,
                    trade.settled_quantity_or_default(),
                )?;
                Ok((EventType::NewTrade, allocation, PositionStatus::Active))
            }
            Transition::AddLot => {
                let allocation = lots::add_lot(
                    state,
                    trade.trade_id.0.as_str().into(),
                    trade.effective_date,
                    trade.settlement_date_or_default(),
                    trade.quantity,
                    trade.price,
                    trade.settled_quantity_or_default(),
                )?;
                Ok((
                    Self::event_type_for(trade.trade_type),
                    allocation,
                    PositionStatus::Active,
                ))
            }
            Transition::Reduce => {
                let method = self.rules.method_for(trade.contract_id.as_ref()).await?;
                let allocation = lots::reduce_lots(state, trade.quantity, trade.price, method)?;
                Ok((
                    Self::event_type_for(trade.trade_type),
                    allocation,
                    PositionStatus::Active,
                ))
            }
            Transition::Close => {
                let method = self.rules.method_for(trade.contract_id.as_ref()).await?;
                let allocation = lots::reduce_lots(state, trade.quantity, trade.price, method)?;
                Ok((EventType::PositionClosed, allocation, PositionStatus::Terminated))
            }
            Transition::DirectionChange { .. } => Err(SystemError::InvariantViolation(
                "direction change must be split before mutation".into(),
            )
            .into()),
        }
    }

    async fn upi_for_transition(
        &self,
        ctx: &Ctx,
        key: &PositionKey,
        transition: &Transition,
        trade: &Trade,
        snapshot: Option<&Snapshot>,
    ) -> SwapbookResult<Upi> {
        let carried = || {
            snapshot.map(|s| s.upi.clone()).ok_or_else(|| {
                SwapbookError::from(SystemError::MissingField(
                    "mutating a position that has no snapshot".into(),
                ))
            })
        };

        match transition {
            Transition::Open | Transition::Reopen => {
                let generation = self.hot(self.upis.generations(key)).await?.len() as u32 + 1;
                let upi = Upi::from_opening_trade(&trade.trade_id);
                self.hot(self.upis.append(UpiGeneration {
                    position_key: key.clone(),
                    generation,
                    upi: upi.clone(),
                    created_at: ctx.occurred_at,
                    terminated_at: None,
                }))
                .await?;
                Ok(upi)
            }
            Transition::Close => {
                self.hot(self.upis.terminate_active(key, ctx.occurred_at)).await?;
                carried()
            }
            _ => carried(),
        }
    }

    // ============================================================================
    // Provisional handling for backdated trades
    // ============================================================================

    /// Dirty estimate: folds the backdated trade into the current snapshot
    /// as if it were current-dated (FIFO for reductions), marks the snapshot
    /// provisional, and hands the trade to the coldpath. Explicitly
    /// approximate; the replayer produces the authoritative snapshot.
    async fn apply_provisional(
        &self,
        ctx: &Ctx,
        key: &PositionKey,
        trade: &Trade,
        snapshot: Snapshot,
    ) -> SwapbookResult<ApplyOutcome> {
        let mut state = snapshot.inflate()?;

        let grows = trade.trade_type == TradeType::NewTrade
            || matches!(
                (snapshot.direction, trade.trade_type),
                (Direction::Long, TradeType::Increase) | (Direction::Short, TradeType::Decrease)
            );
        let estimate = if grows {
            lots::add_lot(
                &mut state,
                trade.trade_id.0.as_str().into(),
                trade.effective_date,
                trade.settlement_date_or_default(),
                trade.quantity,
                trade.price,
                trade.settled_quantity_or_default(),
            )?
        } else {
            match lots::reduce_lots(&mut state, trade.quantity, trade.price, TaxLotMethod::Fifo) {
                Ok(estimate) => estimate,
                Err(short) => {
                    // The chronologically-correct lots may still cover this;
                    // leave the estimate empty and let the replayer decide.
                    warn!(trade = %trade.trade_id, reason = %short, "dirty estimate not coverable");
                    AllocationResult::empty()
                }
            }
        };

        let version = snapshot.last_version + 1;
        let event = PositionEvent::for_trade(
            key.clone(),
            version,
            EventType::ProvisionalApplied,
            trade.clone(),
            estimate.allocations.clone(),
            ctx.occurred_at,
        );
        self.hot(self.events.append(event.clone())).await?;

        let mut schedule = snapshot.schedule.clone();
        schedule.upsert(replay::schedule_entry_for(
            &state,
            trade.effective_date,
            trade.price,
        ));
        let mut summary = SummaryMetrics::from_state(
            &state,
            snapshot.summary.realized_pnl + estimate.total_realized_pnl,
            snapshot.summary.last_event_date,
        );
        // Keep the classifier anchored on the furthest event the position
        // has seen; the provisional event itself is backdated.
        summary.last_event_date = summary.last_event_date.max(Some(trade.effective_date));

        let new_snapshot = Snapshot {
            last_version: version,
            reconciliation_status: ReconciliationStatus::Provisional,
            provisional_trade_id: Some(trade.trade_id.clone()),
            lots: CompressedLots::compress(&state),
            summary,
            schedule,
            opt_lock_version: snapshot.opt_lock_version + 1,
            last_updated_at: ctx.occurred_at,
            ..snapshot.clone()
        };
        self.checked_snapshot_swap(new_snapshot.clone(), Some(snapshot.opt_lock_version))
            .await?;

        self.hot(self.idempotency.mark(IdempotencyRecord {
            trade_id: trade.trade_id.clone(),
            position_key: key.clone(),
            event_version: version,
            processed_at: ctx.occurred_at,
            status: ProcessingStatus::Processed,
        }))
        .await?;

        self.publish(Topic::ProvisionalApplied, key, &event, ctx).await?;
        self.publish(Topic::BackdatedTrades, key, trade, ctx).await?;
        info!(%key, version, "provisional snapshot written, trade routed to coldpath");

        Ok(ApplyOutcome::Provisional(Box::new(Applied {
            snapshot: new_snapshot,
            event,
            allocation: estimate,
        })))
    }

    // ============================================================================
    // Direction change
    // ============================================================================

    /// Splits a zero-crossing trade into a closing leg on the current key
    /// and an opening leg on the opposite-direction key, both under one
    /// logical boundary (both key locks held, one correlation id).
    async fn apply_flip(
        &self,
        ctx: &Ctx,
        key: &PositionKey,
        trade: Trade,
    ) -> SwapbookResult<ApplyOutcome> {
        // Resolve the addressing tuple before locking; it only names keys.
        let snapshot = self.hot(self.snapshots.load(key)).await?;
        let (account, instrument, currency, direction) = match (&trade.scope, &snapshot) {
            (
                TradeScope::Parts {
                    account,
                    instrument,
                    currency,
                    direction,
                },
                _,
            ) => (
                account.clone(),
                instrument.clone(),
                currency.clone(),
                *direction,
            ),
            (TradeScope::Key { .. }, Some(s)) => {
                match (&s.account, &s.instrument, &s.currency) {
                    (Some(account), Some(instrument), Some(currency)) => (
                        account.clone(),
                        instrument.clone(),
                        currency.clone(),
                        s.direction,
                    ),
                    _ => {
                        return Err(SystemError::MissingField(
                            "direction change without an addressing tuple".into(),
                        )
                        .into())
                    }
                }
            }
            (TradeScope::Key { .. }, None) => {
                return Err(SystemError::MissingField(
                    "direction change without an addressing tuple".into(),
                )
                .into())
            }
        };
        let other_key =
            PositionKey::derive(&account, &instrument, &currency, direction.opposite());

        let _guards = self.locks.acquire_pair(key, &other_key).await;

        // Re-evaluate under both locks; the position may have moved while
        // the single-key lock was released.
        let snapshot = self.hot(self.snapshots.load(key)).await?;
        let open_qty = match &snapshot {
            Some(s) => s.inflate()?.total_qty(),
            None => crate::domain::units::Qty::ZERO,
        };
        let transition = machine::evaluate(
            MachineState::from_snapshot(snapshot.as_ref()),
            trade.trade_type,
            trade.quantity,
            open_qty,
        )?;

        let Transition::DirectionChange {
            close_qty,
            open_qty,
        } = transition
        else {
            // No longer crossing; apply as a plain trade while holding the
            // locks.
            return match self.apply_on_key(ctx, key, &trade, false).await? {
                HotStep::Done(outcome) => Ok(outcome),
                HotStep::Flip => Err(SystemError::InvariantViolation(
                    "flip requested with flipping disabled".into(),
                )
                .into()),
            };
        };

        // Closing leg: the client's trade id, sized to flatten this key.
        let close_trade = Trade {
            quantity: close_qty,
            ..trade.clone()
        };
        let closed = match self.apply_on_key(ctx, key, &close_trade, false).await? {
            HotStep::Done(ApplyOutcome::Applied(applied)) => applied,
            _ => {
                return Err(SystemError::InvariantViolation(
                    "closing leg did not apply as a single event".into(),
                )
                .into())
            }
        };

        // Opening leg: derived id on the opposite-direction key, caused by
        // the closing leg.
        let open_trade = Trade {
            trade_id: trade.trade_id.flip(),
            scope: TradeScope::Parts {
                account,
                instrument,
                currency,
                direction: direction.opposite(),
            },
            trade_type: TradeType::NewTrade,
            quantity: open_qty,
            // Any client settlement override was sized against the original
            // quantity, not the synthesized leg.
            settled_quantity: None,
            causation_id: Some(crate::domain::trade::CausationId(trade.trade_id.0.clone())),
            ..trade
        };
        let opened = match self.apply_on_key(ctx, &other_key, &open_trade, false).await? {
            HotStep::Done(ApplyOutcome::Applied(applied)) => applied,
            _ => {
                return Err(SystemError::InvariantViolation(
                    "opening leg did not apply as a single event".into(),
                )
                .into())
            }
        };

        info!(
            closed_key = %key,
            opened_key = %other_key,
            close_qty = %close_qty,
            open_qty = %opened.event.payload.trade().map(|t| t.quantity).unwrap_or_default(),
            "direction change applied"
        );
        Ok(ApplyOutcome::FlipApplied { closed, opened })
    }

    // ============================================================================
    // Snapshot assembly
    // ============================================================================

    #[allow(clippy::too_many_arguments)]
    fn build_snapshot(
        &self,
        ctx: &Ctx,
        key: &PositionKey,
        trade: &Trade,
        prior: Option<&Snapshot>,
        direction: Direction,
        version: u64,
        upi: Upi,
        status: PositionStatus,
        state: PositionState,
        summary: SummaryMetrics,
        schedule: PriceQuantitySchedule,
    ) -> Snapshot {
        let (account, instrument, currency) = match &trade.scope {
            TradeScope::Parts {
                account,
                instrument,
                currency,
                ..
            } => (
                Some(account.clone()),
                Some(instrument.clone()),
                Some(currency.clone()),
            ),
            TradeScope::Key { .. } => (
                prior.and_then(|s| s.account.clone()),
                prior.and_then(|s| s.instrument.clone()),
                prior.and_then(|s| s.currency.clone()),
            ),
        };

        Snapshot {
            position_key: key.clone(),
            account,
            instrument,
            currency,
            direction,
            contract_id: trade
                .contract_id
                .clone()
                .or_else(|| prior.and_then(|s| s.contract_id.clone())),
            last_version: version,
            upi,
            status,
            reconciliation_status: prior
                .map(|s| s.reconciliation_status)
                .unwrap_or(ReconciliationStatus::Reconciled),
            provisional_trade_id: prior.and_then(|s| s.provisional_trade_id.clone()),
            lots: CompressedLots::compress(&state),
            summary,
            schedule,
            opt_lock_version: prior.map(|s| s.opt_lock_version + 1).unwrap_or(1),
            last_updated_at: ctx.occurred_at,
            archival_flag: prior.map(|s| s.archival_flag).unwrap_or(false),
            archived_at: prior.and_then(|s| s.archived_at),
        }
    }

    /// Swaps the snapshot under its optimistic lock. The event row is
    /// already durable at this point and the per-key lock serializes all
    /// writers, so a lock conflict here means something bypassed the lock.
    pub(crate) async fn checked_snapshot_swap(
        &self,
        snapshot: Snapshot,
        expected_lock: Option<u64>,
    ) -> SwapbookResult<()> {
        match self.hot(self.snapshots.upsert(snapshot, expected_lock)).await {
            Err(SwapbookError::Store(StoreError::OptimisticLockConflict {
                key,
                expected,
                actual,
            })) => Err(SystemError::InvariantViolation(format!(
                "snapshot lock for {key} moved inside the key lock: expected {expected}, found {actual}"
            ))
            .into()),
            other => other,
        }
    }
}
