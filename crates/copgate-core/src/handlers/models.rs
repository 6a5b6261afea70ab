use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::models as catalog;
use crate::state::AppState;

#[derive(Serialize)]
struct ModelsList {
    object: &'static str,
    data: Vec<ModelEntry>,
    has_more: bool,
}

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    #[serde(rename = "type")]
    entry_type: &'static str,
    created: i64,
    owned_by: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    display_name: String,
}

/// `GET /models` and `/v1/models`: the cached catalog in OpenAI list shape,
/// fetching on demand if the boot-time fetch was missed.
pub async fn list(State(state): State<Arc<AppState>>) -> Response {
    let mut models = state.list_models();

    if models.is_empty() {
        tracing::info!("models not cached, fetching");
        match catalog::refresh(&state).await {
            Ok(_) => models = state.list_models(),
            Err(err) => return err.into_response(),
        }
    }

    let data = models
        .into_iter()
        .map(|model| ModelEntry {
            id: model.id,
            object: "model",
            entry_type: "model",
            created: 0,
            owned_by: model.owned_by,
            display_name: model.name,
        })
        .collect();

    Json(ModelsList {
        object: "list",
        data,
        has_more: false,
    })
    .into_response()
}
