//! HTTP surface over the dispatcher.

use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, head, post, put};
use axum::Router;
use event_common::health::HealthRegistry;
use thiserror::Error;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::Claims;
use crate::error::DeployError;
use crate::events::Dispatcher;

mod deployments;
mod events;
mod health;

#[derive(Clone)]
pub struct State {
    pub dispatcher: Arc<Dispatcher>,
    pub health_registry: HealthRegistry,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("admin token required")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Deploy(#[from] DeployError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Deploy(e) => e.status(),
        };
        (status, self.to_string()).into_response()
    }
}

/// Raw `Authorization` header, empty when absent.
fn token(headers: &HeaderMap) -> &str {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn require_admin(headers: &HeaderMap) -> Result<Claims, ApiError> {
    let claims = Claims::parse(token(headers)).map_err(|e| {
        warn!("rejecting request with unreadable token: {}", e);
        ApiError::Unauthorized
    })?;
    if !claims.is_admin() {
        warn!(user_id = %claims.sub, "rejecting request of non admin user");
        return Err(ApiError::Unauthorized);
    }
    Ok(claims)
}

pub fn router(state: State) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    Router::new()
        .route("/", get(health::index))
        .route("/_readiness", get(health::index))
        .route("/_liveness", get(health::liveness))
        .route("/health", post(health::report))
        .route("/process-deployments", put(deployments::deploy))
        .route(
            "/process-deployments/:userid/:deplid",
            delete(deployments::remove),
        )
        .route("/events/:id", head(events::check))
        .route("/event-states", get(events::states))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
