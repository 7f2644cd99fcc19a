use std::sync::Arc;

use event_common::health::{HealthHandle, HealthRegistry};
use event_common::kafka_consumer::SingleTopicConsumer;
use event_common::kafka_producer::create_kafka_producer;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tracing::info;

use crate::analytics::engine::AnalyticsClient;
use crate::auth::{KeycloakAuth, TokenProvider};
use crate::client::build_http_client;
use crate::config::Config;
use crate::devices::{DeviceRepository, Devices};
use crate::error::StoreError;
use crate::events::{
    AnalyticsHandler, ConditionalHandler, Dispatcher, DoneProducer, EventHandler,
    KafkaDoneProducer,
};
use crate::imports::{ImportClient, Imports};
use crate::ingestion::CommandTopic;
use crate::store::PgStore;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("failed to set up kafka: {0}")]
    Kafka(#[from] KafkaError),
    #[error("failed to set up conditional event store: {0}")]
    Store(#[from] StoreError),
}

/// A consumer loop waiting to be started.
pub struct CommandConsumer {
    pub consumer: SingleTopicConsumer,
    pub topic: CommandTopic,
    pub liveness: HealthHandle,
}

pub struct AppContext {
    pub health_registry: HealthRegistry,
    pub dispatcher: Arc<Dispatcher>,
    pub consumers: Vec<CommandConsumer>,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, StartupError> {
        let health_registry = HealthRegistry::new("liveness");
        let dispatcher = Arc::new(build_dispatcher(config, &health_registry).await?);

        let mut consumers = vec![CommandConsumer {
            consumer: SingleTopicConsumer::new(
                &config.kafka,
                &config.consumer,
                config.deployment_topic.as_str(),
            )?,
            topic: CommandTopic::Deployment,
            liveness: health_registry
                .register("deployment_consumer", time::Duration::seconds(60)),
        }];
        if let Some(topic) = &config.device_group_topic {
            consumers.push(CommandConsumer {
                consumer: SingleTopicConsumer::new(
                    &config.kafka,
                    &config.consumer,
                    topic.as_str(),
                )?,
                topic: CommandTopic::DeviceGroup,
                liveness: health_registry
                    .register("device_group_consumer", time::Duration::seconds(60)),
            });
        }

        Ok(Self {
            health_registry,
            dispatcher,
            consumers,
        })
    }
}

async fn build_dispatcher(
    config: &Config,
    health_registry: &HealthRegistry,
) -> Result<Dispatcher, StartupError> {
    let client = build_http_client(config.http_client_timeout.0);
    let auth: Arc<dyn TokenProvider> = Arc::new(KeycloakAuth::new(
        client.clone(),
        &config.auth_endpoint,
        &config.auth_client_id,
        &config.auth_client_secret,
        config.auth_expiration_buffer(),
        config.user_token_cache_lifespan.0,
    ));
    let devices: Arc<dyn Devices> = Arc::new(DeviceRepository::new(
        client.clone(),
        &config.device_repository_url,
        auth.clone(),
    ));
    let imports: Arc<dyn Imports> = Arc::new(ImportClient::new(
        client,
        &config.import_deploy_url,
        &config.import_repository_url,
    ));

    let mut handlers: Vec<Arc<dyn EventHandler>> = Vec::new();
    if config.enable_analytics_events {
        let engine = Arc::new(AnalyticsClient::new(
            build_http_client(config.analytics_request_timeout.0),
            &config.flow_engine_url,
            &config.flow_parser_url,
            &config.pipeline_repo_url,
        ));
        handlers.push(Arc::new(AnalyticsHandler::new(
            config,
            engine,
            devices.clone(),
            imports.clone(),
            auth.clone(),
        )));
    } else {
        info!("analytics events disabled");
    }

    if config.conditional_events_enabled() {
        let store = Arc::new(
            PgStore::connect(
                &config.conditional_event_database_url,
                config.max_pg_connections,
            )
            .await?,
        );
        handlers.push(Arc::new(ConditionalHandler::new(
            store.clone(),
            store,
            devices,
            imports,
            auth,
        )));
    } else {
        info!("conditional events disabled");
    }

    let done_producer: Option<Arc<dyn DoneProducer>> = match &config.deployment_done_topic {
        Some(topic) => {
            let liveness = health_registry.register("rdkafka", time::Duration::seconds(30));
            let producer = create_kafka_producer(&config.kafka, liveness).await?;
            let producer: Arc<dyn DoneProducer> =
                Arc::new(KafkaDoneProducer::new(producer, topic.as_str()));
            Some(producer)
        }
        None => None,
    };

    let dispatcher = Dispatcher::new(
        handlers,
        done_producer,
        &config.deployment_done_handler,
        config.debug,
    );
    info!(handlers = ?dispatcher.handler_names(), "dispatcher ready");
    Ok(dispatcher)
}
