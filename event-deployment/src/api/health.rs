use axum::extract::State;
use axum::http::StatusCode;
use event_common::health::HealthStatus;
use tracing::info;

pub const BANNER: &str = "event deployment service";

pub async fn index() -> &'static str {
    BANNER
}

pub async fn liveness(State(state): State<super::State>) -> HealthStatus {
    state.health_registry.get_status()
}

/// Connectivity check target of the platform's health probes.
pub async fn report(body: String) -> StatusCode {
    info!(%body, "received health check");
    StatusCode::OK
}
