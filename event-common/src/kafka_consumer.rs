use std::sync::{Arc, Weak};

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::{ConsumerConfig, KafkaConfig};

/// A consumer bound to exactly one topic, handing out decoded payloads together with
/// an `Offset` that must be stored once the payload has been fully handled.
#[derive(Clone)]
pub struct SingleTopicConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("payload is not valid json: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer gone")]
    Gone,
}

impl SingleTopicConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        consumer_config: &ConsumerConfig,
        topic: &str,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &common_config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("group.id", &consumer_config.kafka_consumer_group)
            .set(
                "auto.offset.reset",
                &consumer_config.kafka_consumer_offset_reset,
            )
            .set("enable.auto.offset.store", "false");

        if common_config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        Ok(Self {
            inner: Arc::new(Inner {
                consumer,
                topic: topic.to_owned(),
            }),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Receive the next message and decode it as json.
    ///
    /// Empty and undecodable payloads can never be handled, so their offset is
    /// stored right away and they are reported as errors.
    pub async fn json_recv<T>(&self) -> Result<(T, Offset), RecvErr>
    where
        T: DeserializeOwned,
    {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let result = match message.payload() {
            None => Err(RecvErr::Empty),
            Some(payload) => serde_json::from_slice(payload).map_err(RecvErr::from),
        };

        match result {
            Ok(payload) => Ok((payload, offset)),
            Err(err) => {
                if let Err(store_err) = offset.store() {
                    warn!("failed to skip unreadable message: {}", store_err);
                }
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}
