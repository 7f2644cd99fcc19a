use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use event_common::model::UserDeployment;
use tracing::info;

use super::{require_admin, ApiError};

pub async fn deploy(
    State(state): State<super::State>,
    headers: HeaderMap,
    body: Result<Json<UserDeployment>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let admin = require_admin(&headers)?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if body.deployment.id.is_empty() {
        return Err(ApiError::BadRequest("missing deployment id".to_owned()));
    }
    if body.user_id.is_empty() {
        return Err(ApiError::BadRequest("missing user id".to_owned()));
    }

    info!(admin = %admin.sub, deployment_id = %body.deployment.id, "deploying process events on request");
    state
        .dispatcher
        .deploy(&body.user_id, &body.deployment)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn remove(
    State(state): State<super::State>,
    Path((user_id, deployment_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let admin = require_admin(&headers)?;
    info!(admin = %admin.sub, %deployment_id, "removing process events on request");
    state.dispatcher.remove(&user_id, &deployment_id).await?;
    Ok(StatusCode::OK)
}
