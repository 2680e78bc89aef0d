//! In-process broker over MPMC channels. Enough transport for embedded use
//! and the test suite: per-topic fan-out, publish order preserved, no
//! delivery once every receiver is dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;

use super::{Message, MessageConsumer, MessageProducer, Topic, TransportResult};
use crate::error::TransportError;

struct Channel {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

/// Broker backed by one unbounded channel per topic.
#[derive(Default)]
pub struct InProcBroker {
    channels: Mutex<HashMap<Topic, Channel>>,
}

impl InProcBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel<T>(&self, topic: Topic, f: impl FnOnce(&Channel) -> T) -> T {
        let mut channels = self.channels.lock().expect("broker registry poisoned");
        let channel = channels.entry(topic).or_insert_with(|| {
            let (tx, rx) = async_channel::unbounded();
            Channel { tx, rx }
        });
        f(channel)
    }
}

#[async_trait]
impl MessageProducer for InProcBroker {
    async fn publish(&self, message: Message) -> TransportResult<()> {
        let topic = message.topic;
        let tx = self.channel(topic, |c| c.tx.clone());
        tx.send(message)
            .await
            .map_err(|_| TransportError::ChannelClosed(topic.to_string()))
    }
}

#[async_trait]
impl MessageConsumer for InProcBroker {
    async fn subscribe(&self, topic: Topic) -> TransportResult<Receiver<Message>> {
        Ok(self.channel(topic, |c| c.rx.clone()))
    }
}
