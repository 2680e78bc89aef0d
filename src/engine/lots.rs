use chrono::NaiveDate;
use itertools::Itertools;
use rust_decimal::Decimal;
use tracing::debug;

use crate::{
    domain::{
        event::{LotAllocation, MetaLots},
        keys::Direction,
        lot::{LotId, TaxLot},
        position::PositionState,
        units::{round_pnl, Px, Qty},
    },
    error::{AllocationError, SwapbookResult},
    rules::TaxLotMethod,
};

/// Ordered allocations plus totals for one mutation. Serialized into the
/// event's meta-lots.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    pub allocations: MetaLots,
    pub total_qty: Qty,
    pub total_realized_pnl: Decimal,
}

impl AllocationResult {
    pub(crate) fn empty() -> Self {
        Self {
            allocations: MetaLots::new(),
            total_qty: Qty::ZERO,
            total_realized_pnl: Decimal::ZERO,
        }
    }
}

// ================================================================================================
// Add
// ================================================================================================

/// Opens a new lot for a NEW_TRADE or an increase-side trade.
pub fn add_lot(
    state: &mut PositionState,
    lot_id: LotId,
    trade_date: NaiveDate,
    settlement_date: NaiveDate,
    quantity: Qty,
    price: Px,
    settled_qty: Qty,
) -> SwapbookResult<AllocationResult> {
    let lot = TaxLot::open(
        lot_id.clone(),
        trade_date,
        settlement_date,
        quantity,
        price,
        settled_qty,
    )?;
    state.push_lot(lot);

    let mut allocations = MetaLots::new();
    allocations.push(LotAllocation {
        lot_id,
        qty: quantity,
        price,
        realized_pnl: None,
    });
    Ok(AllocationResult {
        allocations,
        total_qty: quantity,
        total_realized_pnl: Decimal::ZERO,
    })
}

// ================================================================================================
// Reduce
// ================================================================================================

/// Consumes `requested` across the open lots in the order dictated by the
/// contract's tax-lot method, realizing P&L lot by lot.
///
/// P&L per consumed slice is `(close - basis) * qty` for a long position and
/// `(basis - close) * qty` for a short, rounded half-even at the close
/// price's scale. Closed lots stay in the position but never participate in
/// later reductions. If the open lots cannot cover the request nothing is
/// mutated and `InsufficientQuantity` is returned.
pub fn reduce_lots(
    state: &mut PositionState,
    requested: Qty,
    close_price: Px,
    method: TaxLotMethod,
) -> Result<AllocationResult, AllocationError> {
    if !requested.is_positive() {
        return Err(AllocationError::NonPositiveQuantity(requested.to_string()));
    }

    let available = state.total_qty();
    if requested > available {
        return Err(AllocationError::InsufficientQuantity {
            requested: requested.to_string(),
            available: available.to_string(),
        });
    }

    let direction = state.direction();
    let order = selection_order(state, method);

    let mut result = AllocationResult::empty();
    let mut outstanding = requested;
    let lots = state.lots_mut();

    for idx in order {
        if !outstanding.is_positive() {
            break;
        }
        let lot = &mut lots[idx];
        let consumed = lot.consume(outstanding);
        if consumed.is_zero() {
            continue;
        }
        outstanding -= consumed;

        let spread = match direction {
            Direction::Long => close_price.0 - lot.original_price().0,
            Direction::Short => lot.original_price().0 - close_price.0,
        };
        let pnl = round_pnl(spread * consumed.0, close_price);

        debug!(
            lot = %lot.id(),
            qty = %consumed,
            close = %close_price,
            pnl = %pnl,
            "lot consumed"
        );

        result.allocations.push(LotAllocation {
            lot_id: lot.id().clone(),
            qty: consumed,
            price: close_price,
            realized_pnl: Some(pnl),
        });
        result.total_qty += consumed;
        result.total_realized_pnl += pnl;
    }

    Ok(result)
}

/// Indices of the open lots in consumption order for a method.
///
/// - FIFO: oldest trade date first, ties by insertion order.
/// - LIFO: newest trade date first, ties by reverse insertion order.
/// - HIFO: highest cost basis first, ties by oldest trade date, then
///   insertion order.
fn selection_order(state: &PositionState, method: TaxLotMethod) -> Vec<usize> {
    let open = state
        .lots()
        .iter()
        .enumerate()
        .filter(|(_, lot)| lot.is_open());

    match method {
        TaxLotMethod::Fifo => open
            .sorted_by_key(|(idx, lot)| (lot.trade_date(), *idx))
            .map(|(idx, _)| idx)
            .collect(),
        TaxLotMethod::Lifo => open
            .sorted_by(|(a_idx, a), (b_idx, b)| {
                b.trade_date()
                    .cmp(&a.trade_date())
                    .then(b_idx.cmp(a_idx))
            })
            .map(|(idx, _)| idx)
            .collect(),
        TaxLotMethod::Hifo => open
            .sorted_by(|(a_idx, a), (b_idx, b)| {
                b.original_price()
                    .cmp(&a.original_price())
                    .then(a.trade_date().cmp(&b.trade_date()))
                    .then(a_idx.cmp(b_idx))
            })
            .map(|(idx, _)| idx)
            .collect(),
    }
}

// ================================================================================================
// Price reset
// ================================================================================================

/// Moves the current reference price of every open lot. Cost basis and
/// realized P&L are untouched.
pub fn reset_prices(state: &mut PositionState, price: Px) {
    for lot in state.lots_mut() {
        if lot.is_open() {
            lot.reset_price(price);
        }
    }
}
