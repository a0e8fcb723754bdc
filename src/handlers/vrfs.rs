use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;

use super::{header_request_id, respond, ApiError};
use crate::idempotency;
use crate::models::*;
use crate::AppState;

pub async fn list_vrfs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Vrf>>, ApiError> {
    let vrfs = state.store.list_vrfs().await?;
    Ok(Json(vrfs))
}

pub async fn get_vrf(
    State(state): State<Arc<AppState>>,
    Path(vrf_id): Path<String>,
) -> Result<Json<Vrf>, ApiError> {
    let vrf = state
        .store
        .get_vrf(&vrf_id)
        .await?
        .ok_or_else(|| ApiError::not_found("VRF"))?;
    Ok(Json(vrf))
}

pub async fn create_vrf(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateVrfRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.vrf_id.is_empty() {
        return Err(ApiError::bad_request("vrf_id is required"));
    }

    let params = serde_json::json!({
        "vrf_id": req.vrf_id,
        "description": req.description,
        "tags": req.tags,
        "routable_flag": req.routable_flag,
        "is_default": req.is_default,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vrfs",
        "POST",
        params,
        move || async move {
            let vrf = store.create_vrf(&req).await?;
            Ok((201, serde_json::to_value(vrf)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn update_vrf(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(vrf_id): Path<String>,
    Json(req): Json<UpdateVrfRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({
        "vrf_id": vrf_id,
        "description": req.description,
        "tags": req.tags,
        "routable_flag": req.routable_flag,
        "is_default": req.is_default,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vrfs/:id",
        "PUT",
        params,
        move || async move {
            let vrf = store.update_vrf(&vrf_id, &req).await?;
            Ok((200, serde_json::to_value(vrf)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn delete_vrf(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(vrf_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({ "vrf_id": vrf_id });
    let request_id = header_request_id(&headers);

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vrfs/:id",
        "DELETE",
        params,
        move || async move {
            store.delete_vrf(&vrf_id).await?;
            Ok((
                200,
                serde_json::json!({"message": format!("VRF '{}' deleted successfully", vrf_id)}),
            ))
        },
    )
    .await?;
    Ok(respond(status, body))
}
