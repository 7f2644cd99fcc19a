use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::health::HealthHandle;

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        // The stats callback only fires while the librdkafka main loop is running.
        self.liveness.report_healthy();
    }
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(liveness.into())?;

    match producer
        .client()
        .fetch_metadata(None, Duration::from_secs(15))
    {
        Ok(metadata) => info!(
            "connected to kafka brokers, found {} topics",
            metadata.topics().len()
        ),
        Err(error) => {
            error!("failed to fetch metadata from kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(producer)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: serde_json::Error },
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Serialize `payload` as json and wait for the broker to acknowledge it.
pub async fn send_keyed_json<T, C>(
    producer: &FutureProducer<C>,
    topic: &str,
    key: &str,
    payload: &T,
) -> Result<(), KafkaProduceError>
where
    T: Serialize,
    C: rdkafka::ClientContext + 'static,
{
    let payload = serde_json::to_string(payload)
        .map_err(|error| KafkaProduceError::SerializationError { error })?;

    let delivery = producer
        .send_result(FutureRecord::to(topic).key(key).payload(&payload))
        .map_err(|(error, _)| KafkaProduceError::KafkaProduceError { error })?;

    match delivery.await {
        Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
        Ok(Err((error, _))) => Err(KafkaProduceError::KafkaProduceError { error }),
        Ok(Ok(_)) => Ok(()),
    }
}
