use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use super::{
    keys::{AccountId, Currency, Direction, InstrumentId, PositionKey},
    units::{Px, Qty},
};

// ================================================================================================
// Identifiers
// ================================================================================================

/// Client-assigned, globally unique trade identifier. The idempotency store
/// keys on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub String);

impl TradeId {
    /// Derived id for the opening leg of a direction change. The closing leg
    /// keeps the client id so the client's dedup key lands on the close.
    pub fn flip(&self) -> TradeId {
        TradeId(format!("{}::flip", self.0))
    }
}

impl From<&str> for TradeId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

string_id!(ContractId);
string_id!(CorrelationId);
string_id!(CausationId);
string_id!(UserId);

// ================================================================================================
// Inbound trade contract
// ================================================================================================

/// Kind of an inbound trade. These are the only types a client may submit;
/// everything else (resets, closes, corrections) is synthesized by the
/// engine.
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
pub enum TradeType {
    NewTrade,
    Increase,
    Decrease,
}

/// How the trade addresses its position: either the pre-derived key, or the
/// tuple the key is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TradeScope {
    Key { position_key: PositionKey },
    Parts {
        account: AccountId,
        instrument: InstrumentId,
        currency: Currency,
        direction: Direction,
    },
}

/// An inbound equity-swap trade as accepted at the engine boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    #[serde(flatten)]
    pub scope: TradeScope,
    pub trade_type: TradeType,
    pub quantity: Qty,
    pub price: Px,
    pub effective_date: NaiveDate,
    pub settlement_date: Option<NaiveDate>,
    pub settled_quantity: Option<Qty>,
    pub contract_id: Option<ContractId>,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<CausationId>,
    pub user_id: Option<UserId>,
}

impl Trade {
    /// Resolves the position key this trade is addressed to.
    pub fn position_key(&self) -> PositionKey {
        match &self.scope {
            TradeScope::Key { position_key } => position_key.clone(),
            TradeScope::Parts {
                account,
                instrument,
                currency,
                direction,
            } => PositionKey::derive(account, instrument, currency, *direction),
        }
    }

    /// Settlement date falls back to the trade date when not supplied.
    pub fn settlement_date_or_default(&self) -> NaiveDate {
        self.settlement_date.unwrap_or(self.effective_date)
    }

    /// Settled quantity falls back to the full trade quantity when not
    /// supplied, so a lot opens fully settled unless the client says
    /// otherwise.
    pub fn settled_quantity_or_default(&self) -> Qty {
        self.settled_quantity.unwrap_or(self.quantity)
    }
}
