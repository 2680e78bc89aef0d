use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{impl_add_sub_decimal, impl_from_decimal};

// ================================================================================================
// Domain Strong Types (NewTypes)
// ================================================================================================

/// Represents a quantity of the underlying, always unsigned in storage.
///
/// Direction is carried by the position key, never by the sign of a
/// quantity. Signed arithmetic only happens transiently inside the state
/// machine when deciding whether a trade crosses the zero line.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Qty(pub Decimal);
impl_from_decimal!(Qty);
impl_add_sub_decimal!(Qty);

impl Qty {
    pub const ZERO: Qty = Qty(Decimal::ZERO);

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

/// Represents a price level in the position's currency.
///
/// Used for: cost basis, current reference price, close price, and the
/// quantity-weighted schedule price.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Px(pub Decimal);
impl_from_decimal!(Px);

impl Px {
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }
}

// ================================================================================================
// Decimal helpers
// ================================================================================================

/// Rounds a raw P&L figure half-even at the scale of the close price.
///
/// All P&L in the engine goes through this so that replaying a stream
/// reproduces the persisted figures digit for digit.
pub fn round_pnl(raw: Decimal, close_price: Px) -> Decimal {
    raw.round_dp_with_strategy(close_price.0.scale(), RoundingStrategy::MidpointNearestEven)
}

/// Quantity-weighted average price over `(remaining, current_price)` pairs.
///
/// Returns `None` when the total remaining quantity is zero (a fully closed
/// position has no meaningful average price).
pub fn weighted_avg_price<I>(open_lots: I) -> Option<Px>
where
    I: IntoIterator<Item = (Qty, Px)>,
{
    let mut notional = Decimal::ZERO;
    let mut total = Decimal::ZERO;
    let mut max_scale = 0u32;

    for (qty, px) in open_lots {
        notional += qty.0 * px.0;
        total += qty.0;
        max_scale = max_scale.max(px.0.scale());
    }

    if total.is_zero() {
        return None;
    }

    let avg = (notional / total)
        .round_dp_with_strategy(max_scale, RoundingStrategy::MidpointNearestEven);
    Some(Px(avg))
}
