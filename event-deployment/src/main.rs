use envconfig::Envconfig;
use eyre::{eyre, Result};
use futures::future::select_all;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use event_common::metrics::{serve, setup_metrics_routes};
use event_deployment::api;
use event_deployment::app_context::AppContext;
use event_deployment::config::Config;
use event_deployment::ingestion::consume;

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("starting event deployment");

    let config = Config::init_from_env().expect("invalid configuration:");
    let context = AppContext::new(&config).await?;

    let router = api::router(api::State {
        dispatcher: context.dispatcher.clone(),
        health_registry: context.health_registry.clone(),
    });
    let router = setup_metrics_routes(router)?;
    let bind = config.bind();
    let server: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(%bind, "serving api");
        serve(router, &bind).await?;
        Ok(())
    });

    let dispatcher = context.dispatcher;
    let loops: Vec<JoinHandle<Result<()>>> = context
        .consumers
        .into_iter()
        .map(|c| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                consume(c.consumer, dispatcher, c.topic, c.liveness).await?;
                Ok(())
            })
        })
        .collect();

    tokio::select! {
        (finished, _, _) = select_all(loops) => {
            let result = finished?;
            error!("consumer stopped, shutting down");
            result.and(Err(eyre!("consumer stopped")))
        }
        finished = server => {
            finished??;
            Err(eyre!("api server stopped"))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}
