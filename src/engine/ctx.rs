use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::trade::{CausationId, CorrelationId, Trade, UserId};

/// Per-request context threaded explicitly through every engine call.
///
/// Carries the lineage ids of the originating trade plus the business
/// "today" used for classification, so tests and replays run against fixed
/// dates instead of the wall clock.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub correlation_id: CorrelationId,
    pub causation_id: Option<CausationId>,
    pub user_id: Option<UserId>,
    /// Business date trades are classified against.
    pub as_of: NaiveDate,
    /// Timestamp stamped on events and snapshots written in this request.
    pub occurred_at: DateTime<Utc>,
}

impl Ctx {
    pub fn new(correlation_id: CorrelationId) -> Self {
        let now = Utc::now();
        Self {
            correlation_id,
            causation_id: None,
            user_id: None,
            as_of: now.date_naive(),
            occurred_at: now,
        }
    }

    /// Context for processing a trade, inheriting its lineage.
    pub fn for_trade(trade: &Trade) -> Self {
        let mut ctx = Self::new(trade.correlation_id.clone());
        ctx.causation_id = trade.causation_id.clone();
        ctx.user_id = trade.user_id.clone();
        ctx
    }

    /// Pins the business date, mainly for tests and backfills.
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = date;
        self
    }
}
