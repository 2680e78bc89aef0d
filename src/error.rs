use thiserror::Error;

use crate::domain::{keys::PositionKey, trade::TradeId};

pub type SwapbookResult<T> = Result<T, SwapbookError>;

#[derive(Debug, Error)]
pub enum SwapbookError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors raised by the trade validator. A trade is rejected with the full,
/// ordered list of reasons so the dead-letter record is self-explanatory.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("trade rejected: {}", reasons.join("; "))]
    Rejected { reasons: Vec<String> },
}

/// Errors raised by the tax-lot allocation engine.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("insufficient open quantity: requested {requested}, available {available}")]
    InsufficientQuantity { requested: String, available: String },

    #[error("allocation quantity must be positive, got {0}")]
    NonPositiveQuantity(String),
}

/// Errors raised by the position state machine.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("{trade_type} is not valid while the position is {state}")]
    InvalidForState { state: String, trade_type: String },
}

/// Errors raised by the persistence ports.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event version {version} already exists for position {key}")]
    VersionConflict { key: PositionKey, version: u64 },

    #[error("snapshot for {key} moved: expected lock version {expected}, found {actual}")]
    OptimisticLockConflict {
        key: PositionKey,
        expected: u64,
        actual: u64,
    },

    #[error("trade {0} was already processed")]
    DuplicateTrade(TradeId),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call exceeded its budget")]
    Timeout,
}

/// Errors raised by the outbound messaging port.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel for topic '{0}' is closed")]
    ChannelClosed(String),

    #[error("failed to encode outbound payload: {0}")]
    Encode(String),
}

/// Errors related to internal invariants and corruption. These are never
/// retried; the surrounding job is dead-lettered and an operator is needed.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("replay corruption for position {key}: {msg}")]
    ReplayCorruption { key: PositionKey, msg: String },

    #[error("missing internal field: {0}")]
    MissingField(String),
}

impl SwapbookError {
    /// Short machine code carried on dead-letter records and caller replies.
    pub fn code(&self) -> &'static str {
        match self {
            SwapbookError::Validation(_) => "validation_failed",
            SwapbookError::Allocation(AllocationError::InsufficientQuantity { .. }) => {
                "insufficient_quantity"
            }
            SwapbookError::Allocation(_) => "allocation_failed",
            SwapbookError::Transition(_) => "state_machine_invalid",
            SwapbookError::Store(StoreError::VersionConflict { .. })
            | SwapbookError::Store(StoreError::OptimisticLockConflict { .. }) => {
                "transient_conflict"
            }
            SwapbookError::Store(StoreError::DuplicateTrade(_)) => "duplicate_trade",
            SwapbookError::Store(StoreError::Unavailable(_))
            | SwapbookError::Store(StoreError::Timeout) => "retryable_error",
            SwapbookError::Transport(_) => "retryable_error",
            SwapbookError::System(_) => "fatal_system",
        }
    }

    /// Whether the caller may retry the same trade without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapbookError::Store(StoreError::VersionConflict { .. })
                | SwapbookError::Store(StoreError::OptimisticLockConflict { .. })
                | SwapbookError::Store(StoreError::Unavailable(_))
                | SwapbookError::Store(StoreError::Timeout)
                | SwapbookError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PositionKey {
        PositionKey::from_raw("00000000deadbeef")
    }

    #[test]
    fn test_codes_follow_error_taxonomy() {
        let validation: SwapbookError = ValidationError::Rejected {
            reasons: vec!["quantity must be positive".into()],
        }
        .into();
        assert_eq!(validation.code(), "validation_failed");

        let short: SwapbookError = AllocationError::InsufficientQuantity {
            requested: "200".into(),
            available: "100".into(),
        }
        .into();
        assert_eq!(short.code(), "insufficient_quantity");

        let conflict: SwapbookError = StoreError::VersionConflict {
            key: key(),
            version: 3,
        }
        .into();
        assert_eq!(conflict.code(), "transient_conflict");

        let corrupt: SwapbookError = SystemError::ReplayCorruption {
            key: key(),
            msg: "orphan lot".into(),
        }
        .into();
        assert_eq!(corrupt.code(), "fatal_system");
    }

    #[test]
    fn test_retryability_split() {
        let conflict: SwapbookError = StoreError::OptimisticLockConflict {
            key: key(),
            expected: 2,
            actual: 3,
        }
        .into();
        assert!(conflict.is_retryable());

        let invalid: SwapbookError = TransitionError::InvalidForState {
            state: "NON_EXISTENT".into(),
            trade_type: "INCREASE".into(),
        }
        .into();
        assert!(!invalid.is_retryable());

        let fatal: SwapbookError = SystemError::InvariantViolation("versions not dense".into()).into();
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_rejection_message_joins_reasons_in_order() {
        let err = ValidationError::Rejected {
            reasons: vec!["missing trade id".into(), "price must be positive".into()],
        };
        assert_eq!(
            err.to_string(),
            "trade rejected: missing trade id; price must be positive"
        );
    }
}
