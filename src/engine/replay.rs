//! Chronological fold shared by the coldpath. Replays an event stream from
//! an empty position, re-running allocation for every event rather than
//! trusting persisted meta-lots, so a reconciled snapshot is exactly "what
//! the hotpath would have produced had the events arrived in order".
//!
//! The fold is deliberately lenient where the hotpath state machine is
//! strict: once a backdated event is inserted, the stored event types no
//! longer line up with the states they were recorded against (an INCREASE
//! may now be the first event of the stream, a POSITION_CLOSED may no longer
//! close). Growth-side events therefore always add a lot, reduction-side
//! events always reduce, and an uncoverable reduction is corruption.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{
    domain::{
        event::{EventPayload, EventVersion, MetaLots},
        keys::{Currency, Direction, PositionKey},
        position::PositionState,
        schedule::{PriceQuantitySchedule, ScheduleEntry},
        trade::TradeType,
        units::Px,
        upi::Upi,
    },
    error::{SwapbookResult, SystemError},
    rules::ContractRulesProvider,
};

use super::lots;

/// One entry in replay order: (effective_date ASC, event_version ASC).
#[derive(Debug)]
pub(crate) struct ReplayEntry<'a> {
    pub effective_date: NaiveDate,
    pub event_version: EventVersion,
    pub payload: &'a EventPayload,
}

/// Everything the coldpath needs to rebuild a snapshot.
#[derive(Debug)]
pub(crate) struct ReplayResult {
    pub state: PositionState,
    pub realized_pnl: Decimal,
    pub upi: Option<Upi>,
    pub generations: u32,
    pub schedule: PriceQuantitySchedule,
    pub last_effective_date: Option<NaiveDate>,
    /// Allocations recomputed for the candidate version, when one was given.
    pub candidate_allocations: MetaLots,
}

/// Schedule point after an event: total quantity at the weighted average of
/// the open lots, falling back to the event's own price once flat.
pub(crate) fn schedule_entry_for(
    state: &PositionState,
    effective_date: NaiveDate,
    fallback_price: Px,
) -> ScheduleEntry {
    let quantity = state.total_qty();
    let price = state.avg_open_price().unwrap_or(fallback_price);
    ScheduleEntry {
        effective_date,
        quantity,
        price,
        notional: Some(quantity.0 * price.0),
    }
}

pub(crate) async fn replay(
    key: &PositionKey,
    direction: Direction,
    schedule_unit: &str,
    currency: Currency,
    entries: &[ReplayEntry<'_>],
    candidate_version: Option<EventVersion>,
    rules: &dyn ContractRulesProvider,
) -> SwapbookResult<ReplayResult> {
    let mut result = ReplayResult {
        state: PositionState::new(direction),
        realized_pnl: Decimal::ZERO,
        upi: None,
        generations: 0,
        schedule: PriceQuantitySchedule::new(schedule_unit, currency),
        last_effective_date: None,
        candidate_allocations: MetaLots::new(),
    };

    for entry in entries {
        let fallback_price = match entry.payload {
            EventPayload::PriceReset { price } => {
                lots::reset_prices(&mut result.state, *price);
                *price
            }
            EventPayload::Trade { trade } => {
                let grows = trade.trade_type == TradeType::NewTrade
                    || matches!(
                        (direction, trade.trade_type),
                        (Direction::Long, TradeType::Increase)
                            | (Direction::Short, TradeType::Decrease)
                    );

                let allocation = if grows {
                    if result.state.is_flat() {
                        result.generations += 1;
                        result.upi = Some(Upi::from_opening_trade(&trade.trade_id));
                    }
                    lots::add_lot(
                        &mut result.state,
                        trade.trade_id.0.as_str().into(),
                        trade.effective_date,
                        trade.settlement_date_or_default(),
                        trade.quantity,
                        trade.price,
                        trade.settled_quantity_or_default(),
                    )?
                } else {
                    let method = rules.method_for(trade.contract_id.as_ref()).await?;
                    lots::reduce_lots(&mut result.state, trade.quantity, trade.price, method)
                        .map_err(|e| SystemError::ReplayCorruption {
                            key: key.clone(),
                            msg: format!(
                                "event v{} ({}) cannot be applied: {e}",
                                entry.event_version, trade.trade_id
                            ),
                        })?
                };

                result.realized_pnl += allocation.total_realized_pnl;
                if candidate_version == Some(entry.event_version) {
                    result.candidate_allocations = allocation.allocations.clone();
                }
                trade.price
            }
        };

        result.schedule.upsert(schedule_entry_for(
            &result.state,
            entry.effective_date,
            fallback_price,
        ));
        result.last_effective_date = result
            .last_effective_date
            .max(Some(entry.effective_date));
    }

    Ok(result)
}
