use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use super::{
    keys::PositionKey,
    lot::LotId,
    snapshot::SummaryMetrics,
    trade::{CausationId, ContractId, CorrelationId, Trade, TradeId, UserId},
    units::{Px, Qty},
};

/// Monotonic per-position event version. For any key the persisted versions
/// form the dense sequence `1..=N`.
pub type EventVersion = u64;

/// Kind of a persisted position event.
///
/// `HISTORICAL_CORRECTION` never lands in the event store; it is the type of
/// the outbound correction message emitted after a coldpath reconciliation,
/// so that version density (`1..=N`) holds for stored rows.
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
pub enum EventType {
    NewTrade,
    Increase,
    Decrease,
    Reset,
    PositionClosed,
    HistoricalCorrection,
    ProvisionalApplied,
}

/// What the event carried: the original trade, or a market-data price reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    Trade { trade: Trade },
    PriceReset { price: Px },
}

impl EventPayload {
    pub fn trade(&self) -> Option<&Trade> {
        match self {
            EventPayload::Trade { trade } => Some(trade),
            EventPayload::PriceReset { .. } => None,
        }
    }

    pub fn trade_id(&self) -> Option<&TradeId> {
        self.trade().map(|t| &t.trade_id)
    }
}

/// One post-hoc allocation line: how much of which lot the event touched, at
/// what price, and the realized P&L if the line closed quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotAllocation {
    pub lot_id: LotId,
    pub qty: Qty,
    pub price: Px,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
}

pub type MetaLots = SmallVec<[LotAllocation; 4]>;

/// An immutable, append-only position event. Identity is the composite
/// (position_key, event_version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub position_key: PositionKey,
    pub event_version: EventVersion,
    pub event_type: EventType,
    pub effective_date: NaiveDate,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
    pub meta_lots: MetaLots,
    pub correlation_id: CorrelationId,
    pub causation_id: Option<CausationId>,
    pub contract_id: Option<ContractId>,
    pub user_id: Option<UserId>,
}

impl PositionEvent {
    /// Event row for a trade-shaped mutation (new/increase/decrease/close/
    /// provisional), inheriting its lineage ids from the trade.
    pub fn for_trade(
        key: PositionKey,
        version: EventVersion,
        event_type: EventType,
        trade: Trade,
        meta_lots: MetaLots,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            position_key: key,
            event_version: version,
            event_type,
            effective_date: trade.effective_date,
            occurred_at,
            correlation_id: trade.correlation_id.clone(),
            causation_id: trade.causation_id.clone(),
            contract_id: trade.contract_id.clone(),
            user_id: trade.user_id.clone(),
            payload: EventPayload::Trade { trade },
            meta_lots,
        }
    }

    /// Event row for a market-data reference price reset.
    pub fn for_reset(
        key: PositionKey,
        version: EventVersion,
        effective_date: NaiveDate,
        price: Px,
        correlation_id: CorrelationId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            position_key: key,
            event_version: version,
            event_type: EventType::Reset,
            effective_date,
            occurred_at,
            payload: EventPayload::PriceReset { price },
            meta_lots: MetaLots::new(),
            correlation_id,
            causation_id: None,
            contract_id: None,
            user_id: None,
        }
    }

    /// The client trade id this event originated from, when trade-shaped.
    pub fn trade_id(&self) -> Option<&TradeId> {
        self.payload.trade_id()
    }
}

/// Outbound correction message published after a coldpath reconciliation,
/// carrying the summary before and after the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalCorrection {
    pub event_type: EventType,
    pub position_key: PositionKey,
    pub trade_id: TradeId,
    pub correlation_id: CorrelationId,
    pub before: SummaryMetrics,
    pub after: SummaryMetrics,
    pub quantity_delta: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl HistoricalCorrection {
    pub fn new(
        position_key: PositionKey,
        trade_id: TradeId,
        correlation_id: CorrelationId,
        before: SummaryMetrics,
        after: SummaryMetrics,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let quantity_delta = after.total_quantity.0 - before.total_quantity.0;
        Self {
            event_type: EventType::HistoricalCorrection,
            position_key,
            trade_id,
            correlation_id,
            before,
            after,
            quantity_delta,
            occurred_at,
        }
    }
}
