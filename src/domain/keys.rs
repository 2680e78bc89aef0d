use std::fmt;
use std::hash::Hasher;

use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

// ================================================================================================
// Position addressing
// ================================================================================================

/// Account owning the position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

/// The underlying equity instrument of the swap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(pub String);

/// ISO currency code of the position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(pub String);

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<&str> for InstrumentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<&str> for Currency {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Side of the position. Part of the key: a given (account, instrument,
/// currency) owns up to two independent positions, one per direction.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Sign applied to quantities when reasoning about the zero line.
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }
}

// ================================================================================================
// Position key
// ================================================================================================

/// Length of a well-formed key: 16 lowercase hex chars of an FNV-1a 64-bit
/// hash over the addressing tuple.
pub const POSITION_KEY_LEN: usize = 16;

/// Field separator fed into the hash so that ("ab", "c") and ("a", "bc")
/// never collide.
const KEY_SEPARATOR: u8 = 0x1f;

/// Opaque, stable identifier of a position.
///
/// Derived deterministically from (account, instrument, currency,
/// direction); the same tuple always lands on the same key, across runs and
/// across processes. The key doubles as the partition key on every outbound
/// topic, which is what preserves per-position ordering on partitioned
/// transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey(String);

impl PositionKey {
    /// Derives the key for an addressing tuple.
    pub fn derive(
        account: &AccountId,
        instrument: &InstrumentId,
        currency: &Currency,
        direction: Direction,
    ) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write(account.0.as_bytes());
        hasher.write(&[KEY_SEPARATOR]);
        hasher.write(instrument.0.as_bytes());
        hasher.write(&[KEY_SEPARATOR]);
        hasher.write(currency.0.as_bytes());
        hasher.write(&[KEY_SEPARATOR]);
        hasher.write(direction.to_string().as_bytes());
        Self(format!("{:016x}", hasher.finish()))
    }

    /// Wraps a key received on the wire. No validation happens here; the
    /// validator rejects malformed keys before they reach the engine.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> (AccountId, InstrumentId, Currency) {
        ("ACC-1".into(), "AAPL.US".into(), "USD".into())
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let (account, instrument, currency) = tuple();
        let a = PositionKey::derive(&account, &instrument, &currency, Direction::Long);
        let b = PositionKey::derive(&account, &instrument, &currency, Direction::Long);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), POSITION_KEY_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_direction_is_part_of_the_key() {
        let (account, instrument, currency) = tuple();
        let long = PositionKey::derive(&account, &instrument, &currency, Direction::Long);
        let short = PositionKey::derive(&account, &instrument, &currency, Direction::Short);
        assert_ne!(long, short);
    }

    #[test]
    fn test_separator_prevents_field_bleed() {
        let a = PositionKey::derive(
            &"AB".into(),
            &"C".into(),
            &"USD".into(),
            Direction::Long,
        );
        let b = PositionKey::derive(
            &"A".into(),
            &"BC".into(),
            &"USD".into(),
            Direction::Long,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_direction_opposite_and_sign() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
        assert_eq!(Direction::Long.sign(), 1);
        assert_eq!(Direction::Short.sign(), -1);
        assert_eq!(Direction::Long.to_string(), "LONG");
    }
}
