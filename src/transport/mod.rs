//! Broker-agnostic messaging ports. The engine publishes typed payloads
//! keyed by position key; whatever transport backs the port (Kafka, Solace,
//! the in-process broker in [`channel`]) must preserve per-key ordering.

pub mod channel;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use strum_macros::EnumString;

use crate::{
    domain::{keys::PositionKey, trade::CorrelationId},
    error::TransportError,
};

pub type TransportResult<T> = Result<T, TransportError>;

/// Logical outbound channels of the engine.
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
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Reconciled events applied on the hotpath.
    TradeApplied,
    /// Routes backdated trades from the hotpath to the coldpath.
    BackdatedTrades,
    /// Provisional snapshots pending reconciliation.
    ProvisionalApplied,
    /// Corrections emitted after a coldpath replay.
    HistoricalCorrected,
    /// Rejected trades and parked jobs.
    DeadLetter,
}

/// One message on a topic. The key is always the position key, which is
/// what pins a position to one partition on partitioned transports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: Topic,
    pub key: PositionKey,
    pub value: serde_json::Value,
    pub headers: Vec<(String, String)>,
}

impl Message {
    pub fn new<T: Serialize>(
        topic: Topic,
        key: PositionKey,
        payload: &T,
        correlation_id: &CorrelationId,
    ) -> TransportResult<Self> {
        let value =
            serde_json::to_value(payload).map_err(|e| TransportError::Encode(e.to_string()))?;
        Ok(Self {
            topic,
            key,
            value,
            headers: vec![("correlation-id".to_owned(), correlation_id.0.clone())],
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn publish(&self, message: Message) -> TransportResult<()>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Subscribes to a topic. Messages published after the subscription are
    /// delivered in publish order per key.
    async fn subscribe(&self, topic: Topic) -> TransportResult<async_channel::Receiver<Message>>;
}

/// Record published on the dead-letter topic for trades and jobs the engine
/// refuses to process further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub correlation_id: CorrelationId,
    pub code: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_wire_names_are_kebab_case() {
        assert_eq!(Topic::TradeApplied.to_string(), "trade-applied");
        assert_eq!(Topic::BackdatedTrades.to_string(), "backdated-trades");
        assert_eq!(Topic::HistoricalCorrected.to_string(), "historical-corrected");
        assert_eq!("dead-letter".parse::<Topic>().unwrap(), Topic::DeadLetter);
    }

    #[test]
    fn test_message_carries_correlation_header() {
        let msg = Message::new(
            Topic::TradeApplied,
            PositionKey::from_raw("00000000deadbeef"),
            &serde_json::json!({"hello": "world"}),
            &"corr-42".into(),
        )
        .unwrap();
        assert_eq!(msg.header("correlation-id"), Some("corr-42"));
        assert_eq!(msg.header("missing"), None);
    }
}
