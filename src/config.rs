use std::time::Duration;

/// Tuning knobs for the engine, constructed at startup and passed in.
///
/// The two store timeouts encode the two-pool policy: hotpath calls get a
/// tight budget and fail fast, coldpath calls get a generous one and queue.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Furthest a trade's effective date may sit in the future before the
    /// validator rejects it.
    pub forward_horizon_days: u32,

    /// Per-call budget for hotpath store operations.
    pub hot_store_timeout: Duration,

    /// Per-call budget for coldpath store operations.
    pub cold_store_timeout: Duration,

    /// Wall-clock budget for one coldpath reconciliation; beyond this the
    /// job is parked on the dead-letter topic.
    pub cold_replay_budget: Duration,

    /// First optimistic-conflict backoff delay; doubles per attempt.
    pub backoff_base: Duration,

    /// Bounded retry count for optimistic conflicts.
    pub max_conflict_retries: u32,

    /// Consecutive store failures before the hotpath breaker opens.
    pub breaker_failure_threshold: u32,

    /// How long an open breaker rejects calls before probing again.
    pub breaker_open_for: Duration,

    /// Unit label stamped on price/quantity schedules.
    pub schedule_unit: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            forward_horizon_days: 365,
            hot_store_timeout: Duration::from_millis(50),
            cold_store_timeout: Duration::from_secs(5),
            cold_replay_budget: Duration::from_secs(300),
            backoff_base: Duration::from_millis(50),
            max_conflict_retries: 3,
            breaker_failure_threshold: 5,
            breaker_open_for: Duration::from_secs(10),
            schedule_unit: "SHARES".to_owned(),
        }
    }
}
