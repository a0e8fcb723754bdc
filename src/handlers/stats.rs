use axum::{extract::State, Json};
use std::sync::Arc;

use super::ApiError;
use crate::models::IdempotencyStats;
use crate::AppState;

pub async fn idempotency_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IdempotencyStats>, ApiError> {
    let stats = state.store.idempotency_stats().await?;
    Ok(Json(stats))
}
