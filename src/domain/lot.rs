use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{SwapbookResult, SystemError};

use super::units::{Px, Qty};

/// Identifier of a tax lot, unique within its position. The engine uses the
/// id of the trade that opened the lot, which keeps replay deterministic and
/// the audit trail one hop long.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LotId(pub String);

impl From<&str> for LotId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for LotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A discrete parcel of quantity acquired at a single price on a single
/// trade date, reduced piecewise by later closes.
///
/// Invariants: `0 <= remaining <= original`, `original > 0`. The cost basis
/// (`original_price`) is immutable for the life of the lot; only the current
/// reference price moves on resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxLot {
    id: LotId,
    trade_date: NaiveDate,
    settlement_date: NaiveDate,
    original_qty: Qty,
    remaining_qty: Qty,
    original_price: Px,
    current_price: Px,
    settled_qty: Qty,
}

impl TaxLot {
    pub fn open(
        id: LotId,
        trade_date: NaiveDate,
        settlement_date: NaiveDate,
        quantity: Qty,
        price: Px,
        settled_qty: Qty,
    ) -> SwapbookResult<Self> {
        if !quantity.is_positive() {
            return Err(SystemError::InvariantViolation(format!(
                "lot {id} opened with non-positive quantity {quantity}"
            ))
            .into());
        }
        Ok(Self {
            id,
            trade_date,
            settlement_date,
            original_qty: quantity,
            remaining_qty: quantity,
            original_price: price,
            current_price: price,
            settled_qty,
        })
    }

    /// Rebuilds a lot from persisted parallel arrays. Trusts the caller to
    /// have validated array lengths; re-checks the numeric invariants.
    pub(crate) fn from_parts(
        id: LotId,
        trade_date: NaiveDate,
        settlement_date: NaiveDate,
        original_qty: Qty,
        remaining_qty: Qty,
        original_price: Px,
        current_price: Px,
        settled_qty: Qty,
    ) -> SwapbookResult<Self> {
        if !original_qty.is_positive()
            || remaining_qty > original_qty
            || remaining_qty.0.is_sign_negative()
        {
            return Err(SystemError::InvariantViolation(format!(
                "lot {id} inflated with remaining {remaining_qty} / original {original_qty}"
            ))
            .into());
        }
        Ok(Self {
            id,
            trade_date,
            settlement_date,
            original_qty,
            remaining_qty,
            original_price,
            current_price,
            settled_qty,
        })
    }

    pub fn id(&self) -> &LotId {
        &self.id
    }

    pub fn trade_date(&self) -> NaiveDate {
        self.trade_date
    }

    pub fn settlement_date(&self) -> NaiveDate {
        self.settlement_date
    }

    pub fn original_qty(&self) -> Qty {
        self.original_qty
    }

    pub fn remaining_qty(&self) -> Qty {
        self.remaining_qty
    }

    pub fn original_price(&self) -> Px {
        self.original_price
    }

    pub fn current_price(&self) -> Px {
        self.current_price
    }

    pub fn settled_qty(&self) -> Qty {
        self.settled_qty
    }

    /// A lot participates in reductions while any quantity remains.
    pub fn is_open(&self) -> bool {
        self.remaining_qty.is_positive()
    }

    pub fn remaining_notional(&self) -> rust_decimal::Decimal {
        self.remaining_qty.0 * self.current_price.0
    }

    /// Consumes up to `requested` from this lot, returning how much was
    /// actually taken. Closed lots stay in the position for audit.
    pub(crate) fn consume(&mut self, requested: Qty) -> Qty {
        let taken = self.remaining_qty.min(requested);
        self.remaining_qty -= taken;
        taken
    }

    /// Moves the mutable reference price. Cost basis is untouched.
    pub(crate) fn reset_price(&mut self, price: Px) {
        self.current_price = price;
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn lot() -> TaxLot {
        TaxLot::open(
            "T-1".into(),
            date(15),
            date(17),
            Qty(dec!(1000)),
            Px(dec!(50.00)),
            Qty(dec!(1000)),
        )
        .unwrap()
    }

    #[test]
    fn test_open_sets_remaining_and_reference_from_trade() {
        let lot = lot();
        assert_eq!(lot.remaining_qty(), lot.original_qty());
        assert_eq!(lot.current_price(), lot.original_price());
        assert!(lot.is_open());
        assert_eq!(lot.remaining_notional(), dec!(50000.00));
    }

    #[test]
    fn test_open_rejects_non_positive_quantity() {
        let err = TaxLot::open(
            "T-1".into(),
            date(15),
            date(15),
            Qty::ZERO,
            Px(dec!(50.00)),
            Qty::ZERO,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_consume_is_capped_at_remaining() {
        let mut lot = lot();
        assert_eq!(lot.consume(Qty(dec!(300))), Qty(dec!(300)));
        assert_eq!(lot.remaining_qty(), Qty(dec!(700)));

        // Over-ask only drains what is left; the lot closes but survives.
        assert_eq!(lot.consume(Qty(dec!(900))), Qty(dec!(700)));
        assert_eq!(lot.remaining_qty(), Qty::ZERO);
        assert!(!lot.is_open());
    }

    #[test]
    fn test_reset_price_leaves_cost_basis_alone() {
        let mut lot = lot();
        lot.reset_price(Px(dec!(62.50)));
        assert_eq!(lot.current_price(), Px(dec!(62.50)));
        assert_eq!(lot.original_price(), Px(dec!(50.00)));
    }

    #[test]
    fn test_inflate_rejects_remaining_above_original() {
        let err = TaxLot::from_parts(
            "T-1".into(),
            date(15),
            date(15),
            Qty(dec!(100)),
            Qty(dec!(200)),
            Px(dec!(50.00)),
            Px(dec!(50.00)),
            Qty::ZERO,
        );
        assert!(err.is_err());
    }
}
