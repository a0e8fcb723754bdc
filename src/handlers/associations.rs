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

pub async fn create_association(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateAssociationRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.vpc_id.is_empty() || req.vpc_prefix_cidr.is_empty() || req.parent_prefix_id.is_empty() {
        return Err(ApiError::bad_request(
            "vpc_id, vpc_prefix_cidr, and parent_prefix_id are required",
        ));
    }

    let params = serde_json::json!({
        "vpc_id": req.vpc_id,
        "vpc_prefix_cidr": req.vpc_prefix_cidr,
        "routable": req.routable,
        "parent_prefix_id": req.parent_prefix_id,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vpc-associations",
        "POST",
        params,
        move || async move {
            let association = store.create_association(&req).await?;
            Ok((
                201,
                serde_json::json!({
                    "association_id": association.association_id,
                    "message": "VPC associated successfully",
                    "tags_updated": true,
                }),
            ))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn delete_association(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(association_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({ "association_id": association_id });
    let request_id = header_request_id(&headers);

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/vpc-associations/:id",
        "DELETE",
        params,
        move || async move {
            store.delete_association(&association_id).await?;
            Ok((
                200,
                serde_json::json!({"message": "VPC association removed successfully"}),
            ))
        },
    )
    .await?;
    Ok(respond(status, body))
}
