//! The two event translators and the dispatcher driving them.

use std::collections::HashMap;

use async_trait::async_trait;
use event_common::kafka_messages::deployment::DoneNotification;
use event_common::kafka_producer::{send_keyed_json, KafkaContext};
use event_common::model::{Deployment, DeviceGroup};
use rdkafka::producer::FutureProducer;
use reqwest::StatusCode;

use crate::error::DeployError;

pub mod analytics;
pub mod conditional;
pub mod dispatcher;

pub use analytics::AnalyticsHandler;
pub use conditional::ConditionalHandler;
pub use dispatcher::Dispatcher;

/// One kind of deployed event artifact. Every operation is keyed by deployment id and
/// deploy always replaces whatever the handler deployed for that id before.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deploy(&self, owner: &str, deployment: &Deployment) -> Result<(), DeployError>;

    async fn remove(&self, owner: &str, deployment_id: &str) -> Result<(), DeployError>;

    /// Re-expand everything deployed for the group after its members changed.
    async fn update_device_group(&self, owner: &str, group: &DeviceGroup)
        -> Result<(), DeployError>;

    /// 200 when the event is deployed, 404 when it is not.
    async fn check_event(&self, token: &str, event_id: &str) -> StatusCode;

    async fn get_event_states(
        &self,
        token: &str,
        event_ids: &[String],
    ) -> Result<HashMap<String, bool>, DeployError>;
}

#[async_trait]
pub trait DoneProducer: Send + Sync {
    async fn produce(&self, key: &str, notification: &DoneNotification) -> Result<(), DeployError>;
}

pub struct KafkaDoneProducer {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaDoneProducer {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: &str) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
        }
    }
}

#[async_trait]
impl DoneProducer for KafkaDoneProducer {
    async fn produce(&self, key: &str, notification: &DoneNotification) -> Result<(), DeployError> {
        send_keyed_json(&self.producer, &self.topic, key, notification).await?;
        Ok(())
    }
}
