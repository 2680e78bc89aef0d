use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{keys::PositionKey, trade::TradeId};

/// Unique position identifier attached for regulatory/audit purposes.
///
/// A UPI is minted from the id of the trade that opened its generation, so
/// replaying a stream re-derives the same identifiers. It is re-issued when
/// a position is reopened after termination or flips direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Upi(pub String);

impl Upi {
    pub fn from_opening_trade(trade_id: &TradeId) -> Self {
        Self(trade_id.0.clone())
    }
}

impl From<&str> for Upi {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for Upi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One generation in a position's UPI history. Exactly one generation per
/// key is active (terminated_at = None) at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpiGeneration {
    pub position_key: PositionKey,
    pub generation: u32,
    pub upi: Upi,
    pub created_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
}

impl UpiGeneration {
    pub fn is_active(&self) -> bool {
        self.terminated_at.is_none()
    }
}
