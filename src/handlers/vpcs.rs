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

pub async fn list_vpcs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Vpc>>, ApiError> {
    let vpcs = state.store.list_vpcs().await?;
    Ok(Json(vpcs))
}

pub async fn get_vpc(
    State(state): State<Arc<AppState>>,
    Path(vpc_id): Path<String>,
) -> Result<Json<Vpc>, ApiError> {
    let vpc = state
        .store
        .get_vpc(&vpc_id)
        .await?
        .ok_or_else(|| ApiError::not_found("VPC"))?;
    Ok(Json(vpc))
}

pub async fn create_vpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateVpcRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.provider.is_empty() || req.provider_vpc_id.is_empty() {
        return Err(ApiError::bad_request("provider and provider_vpc_id are required"));
    }

    let params = serde_json::json!({
        "description": req.description,
        "provider": req.provider,
        "provider_account_id": req.provider_account_id,
        "provider_vpc_id": req.provider_vpc_id,
        "region": req.region,
        "tags": req.tags,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vpcs",
        "POST",
        params,
        move || async move {
            let vpc = store.create_vpc(&req).await?;
            Ok((201, serde_json::to_value(vpc)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn update_vpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(vpc_id): Path<String>,
    Json(req): Json<UpdateVpcRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({
        "vpc_id": vpc_id,
        "description": req.description,
        "region": req.region,
        "tags": req.tags,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vpcs/:id",
        "PUT",
        params,
        move || async move {
            let vpc = store.update_vpc(&vpc_id, &req).await?;
            Ok((200, serde_json::to_value(vpc)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn delete_vpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(vpc_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({ "vpc_id": vpc_id });
    let request_id = header_request_id(&headers);

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vpcs/:id",
        "DELETE",
        params,
        move || async move {
            store.delete_vpc(&vpc_id).await?;
            Ok((200, serde_json::json!({"message": "VPC deleted successfully"})))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn get_vpc_associations(
    State(state): State<Arc<AppState>>,
    Path(vpc_id): Path<String>,
) -> Result<Json<Vec<VpcAssociationDetail>>, ApiError> {
    if state.store.get_vpc(&vpc_id).await?.is_none() {
        return Err(ApiError::not_found("VPC"));
    }
    let associations = state.store.list_associations_for_vpc(&vpc_id).await?;
    Ok(Json(associations))
}
