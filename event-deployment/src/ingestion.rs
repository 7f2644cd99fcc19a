//! Consumer loops feeding the deployment and device group topics into the dispatcher.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use event_common::health::{ComponentStatus, HealthHandle};
use event_common::kafka_consumer::{OffsetErr, RecvErr, SingleTopicConsumer};
use event_common::metrics::COMMANDS;
use rdkafka::error::KafkaError;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::DeployError;
use crate::events::Dispatcher;

/// Longest wait for a message before liveness is reported again.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Liveness interval while a command is being handled.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("failed to receive command: {0}")]
    Receive(#[from] KafkaError),
    #[error("failed to handle command: {0}")]
    Command(#[from] DeployError),
    #[error("failed to store offset: {0}")]
    Offset(#[from] OffsetErr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTopic {
    Deployment,
    DeviceGroup,
}

impl CommandTopic {
    fn label(self) -> &'static str {
        match self {
            CommandTopic::Deployment => "deployment",
            CommandTopic::DeviceGroup => "device_group",
        }
    }
}

/// Run one command. `Ok` means its offset may be stored.
pub async fn process(
    dispatcher: &Dispatcher,
    topic: CommandTopic,
    message: &Value,
) -> Result<(), DeployError> {
    let result = match topic {
        CommandTopic::Deployment => dispatcher.handle_command(message).await,
        CommandTopic::DeviceGroup => dispatcher.handle_device_group_command(message).await,
    };
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(COMMANDS, "topic" => topic.label(), "outcome" => outcome).increment(1);
    result
}

/// Drive `work` to completion, reporting liveness every `interval` until it is done.
pub async fn with_heartbeat<F: Future>(
    liveness: &HealthHandle,
    interval: Duration,
    work: F,
) -> F::Output {
    tokio::pin!(work);
    let mut heartbeat = tokio::time::interval(interval);
    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = heartbeat.tick() => liveness.report_healthy(),
        }
    }
}

/// Consume until a command fails. The failed command's offset is not stored, so it
/// is delivered again once the process restarts.
pub async fn consume(
    consumer: SingleTopicConsumer,
    dispatcher: Arc<Dispatcher>,
    topic: CommandTopic,
    liveness: HealthHandle,
) -> Result<(), IngestionError> {
    info!(topic = consumer.topic(), kind = topic.label(), "consuming commands");
    loop {
        liveness.report_healthy();

        let received = match tokio::time::timeout(POLL_INTERVAL, consumer.json_recv::<Value>()).await
        {
            Ok(received) => received,
            Err(_) => continue,
        };
        let (message, offset) = match received {
            Ok(received) => received,
            Err(RecvErr::Kafka(e)) => {
                error!(topic = consumer.topic(), "failed to receive command: {}", e);
                liveness.report_status(ComponentStatus::Unhealthy);
                return Err(e.into());
            }
            Err(e) => {
                warn!(topic = consumer.topic(), "skipping unreadable command: {}", e);
                continue;
            }
        };

        let processed = with_heartbeat(
            &liveness,
            HEARTBEAT_INTERVAL,
            process(&dispatcher, topic, &message),
        )
        .await;
        if let Err(e) = processed {
            error!(topic = consumer.topic(), "command failed, stopping consumer: {}", e);
            liveness.report_status(ComponentStatus::Unhealthy);
            return Err(e.into());
        }
        offset.store()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHandler;
    use async_trait::async_trait;
    use event_common::health::HealthRegistry;
    use event_common::model::{Deployment, DeviceGroup, CURRENT_VERSION};
    use reqwest::StatusCode;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Deploys slowly and records whether the service looked alive when done.
    struct SlowHandler {
        delay: Duration,
        health_registry: HealthRegistry,
        healthy_when_done: Mutex<Vec<bool>>,
    }

    impl SlowHandler {
        fn healthy_when_done(&self) -> Vec<bool> {
            self.healthy_when_done.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler for SlowHandler {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn deploy(&self, _owner: &str, _deployment: &Deployment) -> Result<(), DeployError> {
            tokio::time::sleep(self.delay).await;
            let healthy = self.health_registry.get_status().healthy;
            self.healthy_when_done.lock().unwrap().push(healthy);
            Ok(())
        }

        async fn remove(&self, _owner: &str, _deployment_id: &str) -> Result<(), DeployError> {
            Ok(())
        }

        async fn update_device_group(
            &self,
            _owner: &str,
            _group: &DeviceGroup,
        ) -> Result<(), DeployError> {
            Ok(())
        }

        async fn check_event(&self, _token: &str, _event_id: &str) -> StatusCode {
            StatusCode::NOT_FOUND
        }

        async fn get_event_states(
            &self,
            _token: &str,
            _event_ids: &[String],
        ) -> Result<HashMap<String, bool>, DeployError> {
            Ok(HashMap::new())
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Vec::new(), None, "event-deployment", false)
    }

    #[tokio::test]
    async fn ignored_commands_may_be_acknowledged() {
        let dispatcher = dispatcher();
        for message in [
            json!({"command": "RIGHTS", "id": "dep-1", "version": 3}),
            json!({"command": "PUT", "id": "dep-1", "version": 1}),
            json!([1, 2, 3]),
        ] {
            process(&dispatcher, CommandTopic::Deployment, &message)
                .await
                .unwrap();
        }
        process(
            &dispatcher,
            CommandTopic::DeviceGroup,
            &json!({"command": "DELETE", "id": "g1"}),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_commands_are_not_acknowledged() {
        let dispatcher = dispatcher();
        let err = process(
            &dispatcher,
            CommandTopic::Deployment,
            &json!({"command": "MERGE", "id": "dep-1", "version": 3}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DeployError::UnknownCommand(_)));

        assert!(process(
            &dispatcher,
            CommandTopic::DeviceGroup,
            &json!({"command": "MERGE", "id": "g1"}),
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn slow_commands_keep_the_consumer_alive() {
        let health_registry = HealthRegistry::new("liveness");
        let liveness =
            health_registry.register("deployment_consumer", time::Duration::milliseconds(200));
        let handler = Arc::new(SlowHandler {
            delay: Duration::from_millis(600),
            health_registry: health_registry.clone(),
            healthy_when_done: Mutex::new(Vec::new()),
        });
        let handlers: Vec<Arc<dyn EventHandler>> = vec![handler.clone()];
        let dispatcher = Dispatcher::new(handlers, None, "event-deployment", false);
        let command = json!({
            "command": "PUT",
            "id": "dep-1",
            "owner": "user-1",
            "version": CURRENT_VERSION,
            "deployment": {"id": "dep-1", "version": CURRENT_VERSION},
        });

        liveness.report_healthy();
        process(&dispatcher, CommandTopic::Deployment, &command)
            .await
            .unwrap();

        liveness.report_healthy();
        with_heartbeat(
            &liveness,
            Duration::from_millis(50),
            process(&dispatcher, CommandTopic::Deployment, &command),
        )
        .await
        .unwrap();

        assert_eq!(handler.healthy_when_done(), vec![false, true]);
    }
}
