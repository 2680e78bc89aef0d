#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use swapbook::{
    config::EngineConfig,
    domain::{
        keys::{AccountId, Currency, Direction, InstrumentId, PositionKey},
        trade::{Trade, TradeScope, TradeType},
        units::{Px, Qty},
    },
    engine::{Ctx, PositionEngine},
    rules::StaticRules,
    store::memory::{
        InMemoryEventStore, InMemoryIdempotencyStore, InMemorySnapshotStore, InMemoryUpiStore,
    },
    transport::channel::InProcBroker,
};

pub const ACCOUNT: &str = "ACC-1";
pub const INSTRUMENT: &str = "AAPL.US";
pub const CCY: &str = "USD";

pub struct Harness {
    pub engine: Arc<PositionEngine>,
    pub broker: Arc<InProcBroker>,
    pub events: Arc<InMemoryEventStore>,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub upis: Arc<InMemoryUpiStore>,
}

pub fn harness() -> Harness {
    harness_with(StaticRules::new(), EngineConfig::default())
}

pub fn harness_with(rules: StaticRules, config: EngineConfig) -> Harness {
    init_tracing();

    let events = Arc::new(InMemoryEventStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let idempotency = Arc::new(InMemoryIdempotencyStore::new());
    let upis = Arc::new(InMemoryUpiStore::new());
    let broker = Arc::new(InProcBroker::new());

    let engine = Arc::new(
        PositionEngine::builder()
            .events(events.clone())
            .snapshots(snapshots.clone())
            .idempotency(idempotency.clone())
            .upis(upis.clone())
            .producer(broker.clone())
            .rules(Arc::new(rules))
            .config(config)
            .build()
            .expect("engine wiring"),
    );

    Harness {
        engine,
        broker,
        events,
        snapshots,
        idempotency,
        upis,
    }
}

/// RUST_LOG-controlled logging for test debugging; safe to call per test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).expect("valid january date")
}

pub fn account() -> AccountId {
    ACCOUNT.into()
}

pub fn instrument() -> InstrumentId {
    INSTRUMENT.into()
}

pub fn currency() -> Currency {
    CCY.into()
}

pub fn key_for(direction: Direction) -> PositionKey {
    PositionKey::derive(&account(), &instrument(), &currency(), direction)
}

pub fn parts(direction: Direction) -> TradeScope {
    TradeScope::Parts {
        account: account(),
        instrument: instrument(),
        currency: currency(),
        direction,
    }
}

/// A long-side trade addressed by its parts, priced with two decimals.
pub fn trade(id: &str, trade_type: TradeType, day: u32, qty: Decimal, px: Decimal) -> Trade {
    Trade {
        trade_id: id.into(),
        scope: parts(Direction::Long),
        trade_type,
        quantity: Qty(qty),
        price: Px(px),
        effective_date: date(day),
        settlement_date: None,
        settled_quantity: None,
        contract_id: None,
        correlation_id: format!("corr-{id}").as_str().into(),
        causation_id: None,
        user_id: None,
    }
}

/// Context pinned to the trade's effective date, so the classifier sees it
/// as current-dated.
pub fn ctx_on(trade: &Trade) -> Ctx {
    Ctx::for_trade(trade).as_of(trade.effective_date)
}

/// Context pinned to an explicit business date.
pub fn ctx_at(trade: &Trade, day: u32) -> Ctx {
    Ctx::for_trade(trade).as_of(date(day))
}
