use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use super::{token, ApiError};

#[derive(Deserialize, Debug, Default)]
pub struct StatesQuery {
    #[serde(default)]
    ids: String,
}

impl StatesQuery {
    fn event_ids(&self) -> Vec<String> {
        self.ids
            .split(',')
            .map(|id| id.replace(' ', ""))
            .filter(|id| !id.is_empty())
            .collect()
    }
}

pub async fn check(
    State(state): State<super::State>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    state.dispatcher.check_event(token(&headers), &event_id).await
}

pub async fn states(
    State(state): State<super::State>,
    Query(query): Query<StatesQuery>,
    headers: HeaderMap,
) -> Result<Json<HashMap<String, bool>>, ApiError> {
    let event_ids = query.event_ids();
    if event_ids.is_empty() {
        return Ok(Json(HashMap::new()));
    }
    let states = state
        .dispatcher
        .get_event_states(token(&headers), &event_ids)
        .await?;
    Ok(Json(states))
}
