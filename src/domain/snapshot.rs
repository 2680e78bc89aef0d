use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use crate::error::{SwapbookResult, SystemError};

use super::{
    event::EventVersion,
    keys::{AccountId, Currency, Direction, InstrumentId, PositionKey},
    lot::{LotId, TaxLot},
    position::{PositionState, PositionStatus},
    schedule::PriceQuantitySchedule,
    trade::{ContractId, TradeId},
    units::{Px, Qty},
    upi::Upi,
};

/// Whether the snapshot reflects the full chronological history.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    /// Snapshot equals a replay of all persisted events.
    Reconciled,
    /// A backdated trade was folded in approximately; the coldpath will
    /// replace this snapshot.
    Provisional,
    /// Queued for reconciliation but not yet estimated.
    Pending,
}

// ================================================================================================
// Compressed lots (struct of arrays)
// ================================================================================================

/// Column-oriented persisted form of the lot list.
///
/// This is the transposed struct-of-arrays equivalent of `Vec<TaxLot>`;
/// index i across every array describes lot i. Closed lots are retained with
/// remaining = 0 until the position is archived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedLots {
    pub ids: Vec<LotId>,
    pub trade_dates: Vec<NaiveDate>,
    pub settlement_dates: Vec<NaiveDate>,
    pub original_prices: Vec<Px>,
    pub current_prices: Vec<Px>,
    pub original_qtys: Vec<Qty>,
    pub remaining_qtys: Vec<Qty>,
    pub settled_qtys: Vec<Qty>,
}

impl CompressedLots {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn compress(state: &PositionState) -> Self {
        let mut out = Self::default();
        for lot in state.lots() {
            out.ids.push(lot.id().clone());
            out.trade_dates.push(lot.trade_date());
            out.settlement_dates.push(lot.settlement_date());
            out.original_prices.push(lot.original_price());
            out.current_prices.push(lot.current_price());
            out.original_qtys.push(lot.original_qty());
            out.remaining_qtys.push(lot.remaining_qty());
            out.settled_qtys.push(lot.settled_qty());
        }
        out
    }

    /// Rebuilds the working state. Fails on ragged arrays or lots violating
    /// their numeric invariants; a bad snapshot must never be processed.
    pub fn inflate(&self, direction: Direction) -> SwapbookResult<PositionState> {
        let n = self.ids.len();
        let ragged = [
            self.trade_dates.len(),
            self.settlement_dates.len(),
            self.original_prices.len(),
            self.current_prices.len(),
            self.original_qtys.len(),
            self.remaining_qtys.len(),
            self.settled_qtys.len(),
        ]
        .iter()
        .any(|len| *len != n);
        if ragged {
            return Err(SystemError::InvariantViolation(
                "compressed lot arrays have unequal lengths".into(),
            )
            .into());
        }

        let mut lots = Vec::with_capacity(n);
        for i in 0..n {
            lots.push(TaxLot::from_parts(
                self.ids[i].clone(),
                self.trade_dates[i],
                self.settlement_dates[i],
                self.original_qtys[i],
                self.remaining_qtys[i],
                self.original_prices[i],
                self.current_prices[i],
                self.settled_qtys[i],
            )?);
        }
        Ok(PositionState::from_lots(direction, lots))
    }

    /// Drops fully consumed lots. Only legal on archived snapshots, where
    /// the audit trail has moved to cold storage.
    pub fn prune_closed(&mut self) {
        let keep: Vec<bool> = self.remaining_qtys.iter().map(Qty::is_positive).collect();
        let mut it = keep.iter();
        self.ids.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.trade_dates.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.settlement_dates.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.original_prices.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.current_prices.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.original_qtys.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.settled_qtys.retain(|_| *it.next().unwrap());
        self.remaining_qtys.retain(Qty::is_positive);
    }
}

// ================================================================================================
// Summary metrics
// ================================================================================================

/// Derived totals carried on the snapshot for cheap reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetrics {
    pub total_quantity: Qty,
    pub open_lot_count: u32,
    pub gross_exposure: Decimal,
    pub realized_pnl: Decimal,
    pub last_event_date: Option<NaiveDate>,
}

impl SummaryMetrics {
    pub fn empty() -> Self {
        Self {
            total_quantity: Qty::ZERO,
            open_lot_count: 0,
            gross_exposure: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            last_event_date: None,
        }
    }

    pub fn from_state(
        state: &PositionState,
        realized_pnl: Decimal,
        last_event_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            total_quantity: state.total_qty(),
            open_lot_count: state.open_lot_count() as u32,
            gross_exposure: state.exposure(),
            realized_pnl,
            last_event_date,
        }
    }
}

// ================================================================================================
// Snapshot
// ================================================================================================

/// Latest materialized view of one position. Exactly one snapshot exists per
/// position key; `last_version` always equals the number of events persisted
/// for the key, and `opt_lock_version` guards overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub position_key: PositionKey,
    pub account: Option<AccountId>,
    pub instrument: Option<InstrumentId>,
    pub currency: Option<Currency>,
    pub direction: Direction,
    pub contract_id: Option<ContractId>,

    pub last_version: EventVersion,
    pub upi: Upi,
    pub status: PositionStatus,
    pub reconciliation_status: ReconciliationStatus,
    pub provisional_trade_id: Option<TradeId>,

    pub lots: CompressedLots,
    pub summary: SummaryMetrics,
    pub schedule: PriceQuantitySchedule,

    pub opt_lock_version: u64,
    pub last_updated_at: DateTime<Utc>,
    pub archival_flag: bool,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn inflate(&self) -> SwapbookResult<PositionState> {
        self.lots.inflate(self.direction)
    }

    pub fn is_provisional(&self) -> bool {
        self.reconciliation_status == ReconciliationStatus::Provisional
    }
}
