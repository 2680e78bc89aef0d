use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use super::{
    keys::Direction,
    lot::{LotId, TaxLot},
    units::{weighted_avg_price, Px, Qty},
};

/// Lifecycle status persisted on the snapshot.
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
pub enum PositionStatus {
    Active,
    Terminated,
}

/// In-memory working state of one position: the ordered lot list plus the
/// direction baked into its key.
///
/// Lot order is insertion order, which for a position built on the hotpath
/// equals trade-date order and for a replayed position equals
/// (effective_date, event_version) order. The allocation engine relies on
/// that ordering for its tie-breaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    direction: Direction,
    lots: Vec<TaxLot>,
}

impl PositionState {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            lots: Vec::new(),
        }
    }

    pub fn from_lots(direction: Direction, lots: Vec<TaxLot>) -> Self {
        Self { direction, lots }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn lots(&self) -> &[TaxLot] {
        &self.lots
    }

    pub(crate) fn lots_mut(&mut self) -> &mut [TaxLot] {
        &mut self.lots
    }

    pub(crate) fn push_lot(&mut self, lot: TaxLot) {
        self.lots.push(lot);
    }

    pub fn lot(&self, id: &LotId) -> Option<&TaxLot> {
        self.lots.iter().find(|l| l.id() == id)
    }

    /// Unsigned total remaining quantity across open lots.
    pub fn total_qty(&self) -> Qty {
        self.lots.iter().map(TaxLot::remaining_qty).sum()
    }

    pub fn open_lot_count(&self) -> usize {
        self.lots.iter().filter(|l| l.is_open()).count()
    }

    /// Gross exposure: sum of remaining quantity times current reference
    /// price over all open lots.
    pub fn exposure(&self) -> Decimal {
        self.lots
            .iter()
            .filter(|l| l.is_open())
            .map(TaxLot::remaining_notional)
            .sum()
    }

    /// Quantity-weighted average reference price of the open lots. `None`
    /// when nothing is open.
    pub fn avg_open_price(&self) -> Option<Px> {
        weighted_avg_price(
            self.lots
                .iter()
                .filter(|l| l.is_open())
                .map(|l| (l.remaining_qty(), l.current_price())),
        )
    }

    pub fn is_flat(&self) -> bool {
        self.total_qty().is_zero()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn lot(id: &str, d: u32, qty: Decimal, px: Decimal) -> TaxLot {
        TaxLot::open(id.into(), date(d), date(d), Qty(qty), Px(px), Qty(qty)).unwrap()
    }

    fn state() -> PositionState {
        PositionState::from_lots(
            Direction::Long,
            vec![
                lot("T-1", 15, dec!(1000), dec!(50.00)),
                lot("T-2", 16, dec!(500), dec!(55.00)),
            ],
        )
    }

    #[test]
    fn test_totals_over_open_lots() {
        let state = state();
        assert_eq!(state.total_qty(), Qty(dec!(1500)));
        assert_eq!(state.open_lot_count(), 2);
        assert_eq!(state.exposure(), dec!(77500.00));
        assert_eq!(state.avg_open_price(), Some(Px(dec!(51.67))));
        assert!(!state.is_flat());
    }

    #[test]
    fn test_closed_lots_drop_out_of_exposure_but_stay_listed() {
        let mut state = state();
        state.lots_mut()[0].consume(Qty(dec!(1000)));

        assert_eq!(state.total_qty(), Qty(dec!(500)));
        assert_eq!(state.open_lot_count(), 1);
        assert_eq!(state.exposure(), dec!(27500.00));
        // The closed lot is retained for audit.
        assert_eq!(state.lots().len(), 2);
    }

    #[test]
    fn test_empty_state_is_flat() {
        let state = PositionState::new(Direction::Short);
        assert!(state.is_flat());
        assert_eq!(state.avg_open_price(), None);
        assert_eq!(state.exposure(), Decimal::ZERO);
    }

    #[test]
    fn test_status_wire_spelling() {
        assert_eq!(PositionStatus::Active.to_string(), "ACTIVE");
        assert_eq!(
            "TERMINATED".parse::<PositionStatus>().unwrap(),
            PositionStatus::Terminated
        );
    }
}
