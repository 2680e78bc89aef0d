use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;

use crate::{
    config::EngineConfig,
    domain::trade::{Trade, TradeScope},
    error::ValidationError,
};

/// Accepted position-key format: 16 lowercase hex chars, as produced by
/// the key derivation.
static KEY_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{16}$").expect("key format regex"));

/// Rejects malformed or business-invalid trades before they reach the
/// processors. On rejection the full, ordered reason list is returned so the
/// dead-letter record explains itself; rejected trades are never retried.
pub fn validate(
    trade: &Trade,
    config: &EngineConfig,
    today: NaiveDate,
) -> Result<(), ValidationError> {
    let mut reasons = Vec::new();

    if trade.trade_id.0.trim().is_empty() {
        reasons.push("missing trade id".to_owned());
    }

    match &trade.scope {
        TradeScope::Key { position_key } => {
            if !KEY_FORMAT.is_match(position_key.as_str()) {
                reasons.push(format!(
                    "position key '{}' is not 16 lowercase hex chars",
                    position_key
                ));
            }
        }
        TradeScope::Parts {
            account,
            instrument,
            currency,
            ..
        } => {
            if account.0.trim().is_empty() {
                reasons.push("missing account".to_owned());
            }
            if instrument.0.trim().is_empty() {
                reasons.push("missing instrument".to_owned());
            }
            if currency.0.trim().is_empty() {
                reasons.push("missing currency".to_owned());
            }
        }
    }

    if !trade.quantity.is_positive() {
        reasons.push(format!("quantity must be positive, got {}", trade.quantity));
    }

    if !trade.price.is_positive() {
        reasons.push(format!("price must be positive, got {}", trade.price));
    }

    let horizon = today
        .checked_add_days(Days::new(config.forward_horizon_days as u64))
        .unwrap_or(NaiveDate::MAX);
    if trade.effective_date > horizon {
        reasons.push(format!(
            "effective date {} is beyond the {}-day forward horizon",
            trade.effective_date, config.forward_horizon_days
        ));
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::Rejected { reasons })
    }
}
