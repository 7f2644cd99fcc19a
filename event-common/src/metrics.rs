use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const DEPLOYED_PROCESSES: &str = "event_deployment_deployed_processes_total";
pub const REMOVED_PROCESSES: &str = "event_deployment_removed_processes_total";
/// Analytics pipelines created for message events.
pub const DEPLOYED_ANALYTICS_EVENTS: &str = "event_deployment_deployed_analytics_events_total";
pub const REMOVED_ANALYTICS_EVENTS: &str = "event_deployment_removed_analytics_events_total";
pub const DEPLOYED_CONDITIONAL_EVENTS: &str =
    "event_deployment_deployed_conditional_events_total";
pub const REMOVED_CONDITIONAL_EVENTS: &str = "event_deployment_removed_conditional_events_total";
pub const COMMANDS: &str = "event_deployment_commands_total";

/// Bind a `TcpListener` on the provided bind address and serve the `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Add the `/metrics` route and the HTTP tracking middleware to an existing router.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_metrics)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(EXPONENTIAL_SECONDS)?
        .install_recorder()
}

/// Middleware recording request counts and latencies per matched route.
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("path", path),
        ("status", response.status().as_u16().to_string()),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
