use chrono::NaiveDate;
use strum::{Display, EnumIter};
use strum_macros::EnumString;

/// Routing decision for one trade: hotpath (current/forward) or coldpath
/// (backdated).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeTiming {
    CurrentDated,
    ForwardDated,
    Backdated,
}

impl TradeTiming {
    pub fn is_backdated(&self) -> bool {
        matches!(self, TradeTiming::Backdated)
    }
}

/// Classifies a trade against the latest event the position has seen.
///
/// A position with no snapshot classifies as current-dated regardless of the
/// effective date: there is no history to land behind. Forward-dated trades
/// apply on the hotpath exactly like current-dated ones; only trades landing
/// before the position's latest event take the coldpath.
pub fn classify(
    effective_date: NaiveDate,
    today: NaiveDate,
    last_event_date: Option<NaiveDate>,
) -> TradeTiming {
    let Some(last) = last_event_date else {
        return TradeTiming::CurrentDated;
    };

    if effective_date < last {
        TradeTiming::Backdated
    } else if effective_date == today {
        TradeTiming::CurrentDated
    } else {
        TradeTiming::ForwardDated
    }
}
