//! The trade-processing engine: validation, classification, the hotpath
//! apply protocol, and the coldpath replayer, wired over the persistence and
//! messaging ports.

pub mod classifier;
pub mod ctx;
pub mod lots;
pub mod machine;
pub mod validator;

mod coldpath;
mod hotpath;
mod replay;

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::EngineConfig,
    domain::{
        event::{EventType, HistoricalCorrection, PositionEvent},
        keys::{Currency, Direction, PositionKey},
        snapshot::Snapshot,
        trade::{Trade, TradeScope, TradeType},
    },
    error::{StoreError, SwapbookError, SwapbookResult, SystemError},
    retry::{BackoffPolicy, CircuitBreaker},
    rules::ContractRulesProvider,
    store::{locks::KeyLocks, EventStore, IdempotencyStore, SnapshotStore, UpiStore},
    transport::{DeadLetter, Message, MessageConsumer, MessageProducer, Topic},
};

pub use ctx::Ctx;
pub use lots::AllocationResult;

// ================================================================================================
// Outcomes
// ================================================================================================

/// One applied event with the snapshot it produced.
#[derive(Debug)]
pub struct Applied {
    pub snapshot: Snapshot,
    pub event: PositionEvent,
    pub allocation: AllocationResult,
}

/// Result of processing one inbound trade.
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Applied on the hotpath as a single event.
    Applied(Box<Applied>),
    /// Direction change: the closing leg on the original key and the opening
    /// leg on the opposite-direction key, one correlation id across both.
    FlipApplied {
        closed: Box<Applied>,
        opened: Box<Applied>,
    },
    /// The trade id was seen before; nothing was written.
    AlreadyProcessed,
    /// Backdated: a provisional snapshot was written and the trade was
    /// routed to the coldpath.
    Provisional(Box<Applied>),
}

/// Result of one coldpath reconciliation.
#[derive(Debug)]
pub enum ReplayOutcome {
    Reconciled {
        snapshot: Snapshot,
        correction: HistoricalCorrection,
    },
    /// A non-provisional event with this trade id already exists.
    AlreadyReconciled,
}

// ================================================================================================
// Engine
// ================================================================================================

pub struct PositionEngine {
    pub(crate) events: Arc<dyn EventStore>,
    pub(crate) snapshots: Arc<dyn SnapshotStore>,
    pub(crate) idempotency: Arc<dyn IdempotencyStore>,
    pub(crate) upis: Arc<dyn UpiStore>,
    pub(crate) producer: Arc<dyn MessageProducer>,
    pub(crate) rules: Arc<dyn ContractRulesProvider>,
    pub(crate) locks: KeyLocks,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) config: EngineConfig,
}

impl PositionEngine {
    pub fn builder() -> PositionEngineBuilder {
        PositionEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sets the administrative archival flag on a snapshot and prunes its
    /// closed lots. No effect on processing.
    pub async fn archive(&self, ctx: &Ctx, key: &PositionKey) -> SwapbookResult<Snapshot> {
        let _guard = self.locks.acquire(key).await;

        let snapshot = self
            .snapshots
            .load(key)
            .await?
            .ok_or_else(|| SystemError::MissingField(format!("no snapshot for {key}")))?;

        let expected = snapshot.opt_lock_version;
        let mut archived = snapshot;
        archived.archival_flag = true;
        archived.archived_at = Some(ctx.occurred_at);
        archived.lots.prune_closed();
        archived.opt_lock_version = expected + 1;
        archived.last_updated_at = ctx.occurred_at;

        self.snapshots.upsert(archived.clone(), Some(expected)).await?;
        info!(%key, "position archived");
        Ok(archived)
    }

    /// Consumes the backdated-trades topic until cancelled, reconciling each
    /// trade. Errors are dead-lettered inside `reconcile`; the worker only
    /// logs and moves on.
    pub fn spawn_backdated_worker(
        self: &Arc<Self>,
        consumer: Arc<dyn MessageConsumer>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let rx = match consumer.subscribe(Topic::BackdatedTrades).await {
                Ok(rx) => rx,
                Err(e) => {
                    error!(error = %e, "backdated worker could not subscribe");
                    return;
                }
            };
            info!("backdated worker started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("backdated worker stopping");
                        break;
                    }
                    received = rx.recv() => {
                        let Ok(message) = received else {
                            info!("backdated channel closed");
                            break;
                        };
                        engine.handle_backdated_message(message).await;
                    }
                }
            }
        })
    }

    async fn handle_backdated_message(&self, message: Message) {
        let trade: Trade = match serde_json::from_value(message.value.clone()) {
            Ok(trade) => trade,
            Err(e) => {
                error!(error = %e, "undecodable backdated trade, dead-lettering");
                let correlation = message.header("correlation-id").unwrap_or_default().into();
                self.dead_letter(
                    message.key.clone(),
                    &correlation,
                    "fatal_system",
                    &e.to_string(),
                    message.value,
                )
                .await;
                return;
            }
        };

        let ctx = Ctx::for_trade(&trade);
        match self.reconcile(&ctx, &trade).await {
            Ok(ReplayOutcome::Reconciled { snapshot, .. }) => {
                info!(
                    key = %snapshot.position_key,
                    trade = %trade.trade_id,
                    version = snapshot.last_version,
                    "backdated trade reconciled"
                );
            }
            Ok(ReplayOutcome::AlreadyReconciled) => {}
            Err(e) => {
                warn!(trade = %trade.trade_id, error = %e, "reconciliation failed");
            }
        }
    }

    // ============================================================================
    // Shared plumbing
    // ============================================================================

    /// Hotpath store call: rejected fast while the breaker is open, bounded
    /// by the hot budget. Conflicts are contention, not failures, so only
    /// unavailability and timeouts move the breaker.
    pub(crate) async fn hot<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> SwapbookResult<T> {
        if !self.breaker.allow() {
            return Err(StoreError::Unavailable("hotpath circuit open".into()).into());
        }
        match tokio::time::timeout(self.config.hot_store_timeout, call).await {
            Err(_elapsed) => {
                self.breaker.record_failure();
                Err(StoreError::Timeout.into())
            }
            Ok(Err(e)) => {
                if matches!(e, StoreError::Unavailable(_)) {
                    self.breaker.record_failure();
                }
                Err(e.into())
            }
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Ok(value)
            }
        }
    }

    /// Coldpath store call: generous budget, no breaker.
    pub(crate) async fn cold<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> SwapbookResult<T> {
        match tokio::time::timeout(self.config.cold_store_timeout, call).await {
            Err(_elapsed) => Err(StoreError::Timeout.into()),
            Ok(result) => result.map_err(SwapbookError::from),
        }
    }

    pub(crate) async fn publish<T: Serialize>(
        &self,
        topic: Topic,
        key: &PositionKey,
        payload: &T,
        ctx: &Ctx,
    ) -> SwapbookResult<()> {
        let message = Message::new(topic, key.clone(), payload, &ctx.correlation_id)?;
        self.producer.publish(message).await?;
        Ok(())
    }

    pub(crate) async fn dead_letter(
        &self,
        key: PositionKey,
        correlation_id: &crate::domain::trade::CorrelationId,
        code: &str,
        message: &str,
        payload: serde_json::Value,
    ) {
        let record = DeadLetter {
            correlation_id: correlation_id.clone(),
            code: code.to_owned(),
            message: message.to_owned(),
            payload,
            occurred_at: chrono::Utc::now(),
        };
        let outbound = Message {
            topic: Topic::DeadLetter,
            key,
            value: serde_json::to_value(&record).unwrap_or_default(),
            headers: vec![("correlation-id".into(), record.correlation_id.0.clone())],
        };
        if let Err(e) = self.producer.publish(outbound).await {
            // Losing a dead letter must not fail the caller's path.
            error!(error = %e, code, "failed to publish dead letter");
        }
    }

    pub(crate) fn event_type_for(trade_type: TradeType) -> EventType {
        match trade_type {
            TradeType::NewTrade => EventType::NewTrade,
            TradeType::Increase => EventType::Increase,
            TradeType::Decrease => EventType::Decrease,
        }
    }

    /// Direction of the key a trade addresses: from the explicit parts, or
    /// the existing snapshot. Bare-key trades opening fresh positions default
    /// to long.
    pub(crate) fn direction_for(trade: &Trade, snapshot: Option<&Snapshot>) -> Direction {
        if let Some(s) = snapshot {
            return s.direction;
        }
        match &trade.scope {
            TradeScope::Parts { direction, .. } => *direction,
            TradeScope::Key { .. } => Direction::Long,
        }
    }

    pub(crate) fn currency_for(trade: &Trade, snapshot: Option<&Snapshot>) -> Currency {
        if let Some(s) = snapshot {
            return s.schedule.currency.clone();
        }
        match &trade.scope {
            TradeScope::Parts { currency, .. } => currency.clone(),
            // ISO 4217 "no currency" placeholder for bare-key opens.
            TradeScope::Key { .. } => Currency("XXX".into()),
        }
    }
}

// ================================================================================================
// Builder
// ================================================================================================

/// Wires the engine's collaborators. Everything is explicit; there are no
/// global registries to reach into.
#[derive(Default)]
pub struct PositionEngineBuilder {
    events: Option<Arc<dyn EventStore>>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    upis: Option<Arc<dyn UpiStore>>,
    producer: Option<Arc<dyn MessageProducer>>,
    rules: Option<Arc<dyn ContractRulesProvider>>,
    config: Option<EngineConfig>,
}

impl PositionEngineBuilder {
    pub fn events(mut self, store: Arc<dyn EventStore>) -> Self {
        self.events = Some(store);
        self
    }

    pub fn snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    pub fn upis(mut self, store: Arc<dyn UpiStore>) -> Self {
        self.upis = Some(store);
        self
    }

    pub fn producer(mut self, producer: Arc<dyn MessageProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn rules(mut self, rules: Arc<dyn ContractRulesProvider>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> SwapbookResult<PositionEngine> {
        let missing = |field: &str| SystemError::MissingField(format!("engine builder: {field}"));
        let config = self.config.unwrap_or_default();

        Ok(PositionEngine {
            events: self.events.ok_or_else(|| missing("events"))?,
            snapshots: self.snapshots.ok_or_else(|| missing("snapshots"))?,
            idempotency: self.idempotency.ok_or_else(|| missing("idempotency"))?,
            upis: self.upis.ok_or_else(|| missing("upis"))?,
            producer: self.producer.ok_or_else(|| missing("producer"))?,
            rules: self.rules.ok_or_else(|| missing("rules"))?,
            locks: KeyLocks::new(),
            backoff: BackoffPolicy::new(config.backoff_base, config.max_conflict_retries),
            breaker: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_open_for,
            ),
            config,
        })
    }
}
