//! Boot-time model catalog. Cached for the process lifetime; replaced only
//! by explicit refresh.

use std::sync::Arc;

use copgate_protocol::copilot::{ModelDescriptor, ModelsResponse};

use crate::error::ApiError;
use crate::state::AppState;
use crate::upstream;

pub async fn fetch_models(state: &AppState) -> Result<Vec<ModelDescriptor>, ApiError> {
    let response = upstream::get_copilot(state, "/models").await?;
    let body = response.bytes().await.map_err(ApiError::transport)?;
    let parsed: ModelsResponse =
        serde_json::from_slice(&body).map_err(ApiError::transport)?;
    Ok(parsed.data)
}

/// Fetch and cache the catalog under the registry's write lock.
pub async fn refresh(state: &Arc<AppState>) -> Result<usize, ApiError> {
    let models = fetch_models(state).await?;
    let count = models.len();
    *state.models.write().unwrap() = models;
    tracing::info!(count, "model catalog refreshed");
    Ok(count)
}
