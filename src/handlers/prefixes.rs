use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{header_request_id, respond, ApiError};
use crate::idempotency;
use crate::models::*;
use crate::AppState;

pub async fn list_prefixes(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PrefixFilter>,
) -> Result<Json<Vec<Prefix>>, ApiError> {
    let prefixes = state.store.filter_prefixes(&filter).await?;
    Ok(Json(prefixes))
}

pub async fn get_prefix(
    State(state): State<Arc<AppState>>,
    Path(prefix_id): Path<String>,
) -> Result<Json<Prefix>, ApiError> {
    let prefix = state
        .store
        .get_prefix(&prefix_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Prefix"))?;
    Ok(Json(prefix))
}

pub async fn create_prefix(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreatePrefixRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.vrf_id.is_empty() || req.cidr.is_empty() {
        return Err(ApiError::bad_request("vrf_id and cidr are required"));
    }

    let params = serde_json::json!({
        "vrf_id": req.vrf_id,
        "cidr": req.cidr,
        "parent_prefix_id": req.parent_prefix_id,
        "tags": req.tags,
        "routable": req.routable,
        "vpc_children_type_flag": req.vpc_children_type_flag,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/prefixes",
        "POST",
        params,
        move || async move {
            let prefix = store.create_manual_prefix(&req).await?;
            Ok((201, serde_json::to_value(prefix)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn update_prefix(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(prefix_id): Path<String>,
    Json(req): Json<UpdatePrefixRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({
        "prefix_id": prefix_id,
        "tags": req.tags,
        "routable": req.routable,
        "vpc_children_type_flag": req.vpc_children_type_flag,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/prefixes/:id",
        "PUT",
        params,
        move || async move {
            let prefix = store.update_manual_prefix(&prefix_id, &req).await?;
            Ok((200, serde_json::to_value(prefix)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

pub async fn delete_prefix(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(prefix_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({ "prefix_id": prefix_id });
    let request_id = header_request_id(&headers);

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/prefixes/:id",
        "DELETE",
        params,
        move || async move {
            store.delete_manual_prefix(&prefix_id).await?;
            Ok((200, serde_json::json!({"message": "Prefix deleted successfully"})))
        },
    )
    .await?;
    Ok(respond(status, body))
}

/// Create a public IP prefix (standalone, or VPC-attached when vpc_id given)
pub async fn create_public_ip(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreatePublicIpRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.cidr.is_empty() {
        return Err(ApiError::bad_request("cidr is required"));
    }

    let params = serde_json::json!({
        "cidr": req.cidr,
        "vpc_id": req.vpc_id,
        "tags": req.tags,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/prefixes/public-ip",
        "POST",
        params,
        move || async move {
            let prefix = store.create_public_ip_prefix(&req).await?;
            Ok((201, serde_json::to_value(prefix)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

#[derive(Debug, Deserialize)]
pub struct BestParentQuery {
    pub vrf_id: String,
    pub cidr: String,
}

/// Longest-prefix-match parent among the VRF's manual prefixes
pub async fn get_best_parent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BestParentQuery>,
) -> Result<Json<Prefix>, ApiError> {
    let parent = state
        .store
        .find_best_parent(&query.vrf_id, &query.cidr)
        .await?
        .ok_or_else(|| ApiError::not_found("Parent prefix"))?;
    Ok(Json(parent))
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    #[serde(default)]
    pub vrf_id: Option<String>,
}

pub async fn get_prefix_tree(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Vec<TreeNode>>, ApiError> {
    let prefixes = state.store.prefix_tree(query.vrf_id.as_deref()).await?;
    Ok(Json(build_tree(&prefixes, None)))
}

/// Nest the flat depth-ordered rows into a forest via parent links
fn build_tree(prefixes: &[Prefix], parent_id: Option<&str>) -> Vec<TreeNode> {
    prefixes
        .iter()
        .filter(|p| p.parent_prefix_id.as_deref() == parent_id)
        .map(|p| TreeNode {
            prefix_id: p.prefix_id.clone(),
            vrf_id: p.vrf_id.clone(),
            cidr: p.cidr.clone(),
            tags: p.tags.clone(),
            indentation_level: p.indentation_level,
            parent_prefix_id: p.parent_prefix_id.clone(),
            source: p.source.clone(),
            routable: p.routable,
            vpc_children_type_flag: p.vpc_children_type_flag,
            vpc_id: p.vpc_id.clone(),
            children: build_tree(prefixes, Some(&p.prefix_id)),
        })
        .collect()
}

pub async fn get_prefix_children(
    State(state): State<Arc<AppState>>,
    Path(prefix_id): Path<String>,
) -> Result<Json<Vec<Prefix>>, ApiError> {
    if state.store.get_prefix(&prefix_id).await?.is_none() {
        return Err(ApiError::not_found("Prefix"));
    }
    let children = state.store.list_prefix_children(&prefix_id).await?;
    Ok(Json(children))
}

pub async fn allocate_subnet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AllocateSubnetRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let params = serde_json::json!({
        "vrf_id": req.vrf_id,
        "subnet_size": req.subnet_size,
        "tags": req.tags,
        "routable": req.routable,
        "parent_prefix_id": req.parent_prefix_id,
        "description": req.description,
        "vpc_children_type_flag": req.vpc_children_type_flag,
    });
    let request_id = req.request_id.clone().or_else(|| header_request_id(&headers));

    let store = state.store.clone();
    let (status, body, _) = idempotency::run_idempotent(
        &state.store,
        request_id,
        "/api/prefixes/allocate-subnet",
        "POST",
        params,
        move || async move {
            let allocation = store.allocate_subnet(&req).await?;
            Ok((201, serde_json::to_value(allocation)?))
        },
    )
    .await?;
    Ok(respond(status, body))
}

#[derive(Debug, Deserialize)]
pub struct AvailableSubnetsQuery {
    pub subnet_size: u8,
}

pub async fn get_available_subnets(
    State(state): State<Arc<AppState>>,
    Path(prefix_id): Path<String>,
    Query(query): Query<AvailableSubnetsQuery>,
) -> Result<Json<AvailableSubnets>, ApiError> {
    let preview = state
        .store
        .preview_available_subnets(&prefix_id, query.subnet_size)
        .await?;
    Ok(Json(preview))
}

/// Whether a child prefix may be created under this prefix.
/// VPC-sourced prefixes and vpc-children-only parents refuse; an existing
/// VPC association alone does not prevent subdivision.
pub async fn can_create_child(
    State(state): State<Arc<AppState>>,
    Path(prefix_id): Path<String>,
) -> Result<Json<CanCreateChildResponse>, ApiError> {
    let prefix = state
        .store
        .get_prefix(&prefix_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Prefix"))?;

    if prefix.source == prefix_source::VPC {
        return Ok(Json(CanCreateChildResponse {
            can_create_child: false,
            reason: "VPC-sourced prefixes cannot have child prefixes".to_string(),
        }));
    }

    if prefix.vpc_children_type_flag {
        return Ok(Json(CanCreateChildResponse {
            can_create_child: false,
            reason: "Prefix children are VPC subnets only; cannot create manual child prefixes"
                .to_string(),
        }));
    }

    Ok(Json(CanCreateChildResponse {
        can_create_child: true,
        reason: "Manual prefix can be subdivided".to_string(),
    }))
}

pub async fn can_associate_vpc(
    State(state): State<Arc<AppState>>,
    Path(prefix_id): Path<String>,
) -> Result<Json<CanAssociateVpcResponse>, ApiError> {
    let prefix = state
        .store
        .get_prefix(&prefix_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Prefix"))?;

    if prefix.source == prefix_source::VPC {
        return Ok(Json(CanAssociateVpcResponse {
            can_associate: false,
            reason: "Prefixes whose source is cloud VPC cannot associate to VPC".to_string(),
            existing_vpc_id: None,
        }));
    }

    if prefix.routable {
        let associations = state.store.list_associations_for_prefix(&prefix_id).await?;
        if let Some(existing) = associations.first() {
            return Ok(Json(CanAssociateVpcResponse {
                can_associate: false,
                reason:
                    "Routable prefixes can only associate to one VPC ID. This prefix is already associated"
                        .to_string(),
                existing_vpc_id: Some(existing.vpc_id.clone()),
            }));
        }
        return Ok(Json(CanAssociateVpcResponse {
            can_associate: true,
            reason: "Routable prefix not yet associated".to_string(),
            existing_vpc_id: None,
        }));
    }

    Ok(Json(CanAssociateVpcResponse {
        can_associate: true,
        reason: "Non-routable prefixes can associate to multiple VPC IDs".to_string(),
        existing_vpc_id: None,
    }))
}

pub async fn get_prefix_vpc_associations(
    State(state): State<Arc<AppState>>,
    Path(prefix_id): Path<String>,
) -> Result<Json<Vec<PrefixAssociationDetail>>, ApiError> {
    if state.store.get_prefix(&prefix_id).await?.is_none() {
        return Err(ApiError::not_found("Prefix"));
    }
    let associations = state.store.list_associations_for_prefix(&prefix_id).await?;
    Ok(Json(associations))
}
