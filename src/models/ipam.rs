use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TagMap;

/// Prefix source values
pub mod prefix_source {
    pub const MANUAL: &str = "manual";
    pub const VPC: &str = "vpc";
}

/// Cloud provider values
#[allow(dead_code)]
pub mod cloud_provider {
    pub const AWS: &str = "aws";
    pub const AZURE: &str = "azure";
    pub const GCP: &str = "gcp";
    pub const OTHER: &str = "other";
}

/// Reserved VRF for public internet addresses
pub const PUBLIC_VRF_ID: &str = "public-vrf";

/// Well-known tag keys written by the allocator, the association endpoints,
/// and the VPC sync service
pub mod tag_keys {
    pub const ALLOCATED_FROM: &str = "allocated_from";
    pub const ALLOCATION_TIMESTAMP: &str = "allocation_timestamp";
    pub const DESCRIPTION: &str = "description";
    pub const ASSOCIATED_VPC: &str = "associated_vpc";
    pub const AWS_SUBNET_ID: &str = "aws_subnet_id";
    pub const AVAILABILITY_ZONE: &str = "availability_zone";
    pub const STATE: &str = "state";
    pub const SYNC_SOURCE: &str = "sync_source";
    pub const LAST_SYNC: &str = "last_sync";
    pub const DELETED_FROM_AWS: &str = "deleted_from_aws";
    pub const DELETION_REASON: &str = "deletion_reason";
    pub const RESURRECTED_AT: &str = "resurrected_at";
}

fn default_true() -> bool {
    true
}

// ========== VRF ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vrf {
    pub vrf_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: TagMap,
    pub routable_flag: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVrfRequest {
    pub vrf_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default = "default_true")]
    pub routable_flag: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateVrfRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<TagMap>,
    #[serde(default)]
    pub routable_flag: Option<bool>,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub request_id: Option<String>,
}

// ========== VPC ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpc {
    pub vpc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_account_id: Option<String>,
    pub provider_vpc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub tags: TagMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateVpcRequest {
    #[serde(default)]
    pub description: Option<String>,
    pub provider: String,
    #[serde(default)]
    pub provider_account_id: Option<String>,
    pub provider_vpc_id: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateVpcRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: Option<TagMap>,
    #[serde(default)]
    pub request_id: Option<String>,
}

// ========== Prefix ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prefix {
    pub prefix_id: String,
    pub vrf_id: String,
    pub cidr: String,
    pub tags: TagMap,
    pub indentation_level: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_prefix_id: Option<String>,
    pub source: String,
    pub routable: bool,
    pub vpc_children_type_flag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrefixRequest {
    pub vrf_id: String,
    pub cidr: String,
    #[serde(default)]
    pub parent_prefix_id: Option<String>,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default = "default_true")]
    pub routable: bool,
    #[serde(default)]
    pub vpc_children_type_flag: bool,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePrefixRequest {
    #[serde(default)]
    pub tags: Option<TagMap>,
    #[serde(default)]
    pub routable: Option<bool>,
    #[serde(default)]
    pub vpc_children_type_flag: Option<bool>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Create a public IP prefix in public-vrf. With a vpc_id the prefix is
/// VPC-attached (source=vpc); without one it is a standalone manual entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePublicIpRequest {
    pub cidr: String,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Filters for the prefix list endpoint. `search` accepts free-text and
/// `key:value` tag terms combined with AND logic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrefixFilter {
    #[serde(default)]
    pub vrf_id: Option<String>,
    #[serde(default)]
    pub routable: Option<bool>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_account_id: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub prefix_id: String,
    pub vrf_id: String,
    pub cidr: String,
    pub tags: TagMap,
    pub indentation_level: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_prefix_id: Option<String>,
    pub source: String,
    pub routable: bool,
    pub vpc_children_type_flag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanCreateChildResponse {
    pub can_create_child: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanAssociateVpcResponse {
    pub can_associate: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_vpc_id: Option<String>,
}

// ========== Allocation ==========

#[derive(Debug, Clone, Deserialize)]
pub struct AllocateSubnetRequest {
    pub vrf_id: String,
    pub subnet_size: u8,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default = "default_true")]
    pub routable: bool,
    #[serde(default)]
    pub parent_prefix_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub vpc_children_type_flag: bool,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubnetAllocation {
    pub allocated_cidr: String,
    pub parent_prefix_id: String,
    pub prefix_id: String,
    pub available_count: usize,
    pub parent_cidr: String,
    pub tags: TagMap,
    pub routable: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableSubnets {
    pub parent_prefix_id: String,
    pub parent_cidr: String,
    pub subnet_size: u8,
    pub available_subnets: Vec<String>,
    pub available_count: usize,
    pub total_possible: u64,
    pub ip_version: u8,
}

// ========== VPC / prefix associations ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpcPrefixAssociation {
    pub association_id: String,
    pub vpc_id: String,
    pub vpc_prefix_cidr: String,
    pub routable: bool,
    pub parent_prefix_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAssociationRequest {
    pub vpc_id: String,
    pub vpc_prefix_cidr: String,
    pub routable: bool,
    pub parent_prefix_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Association as seen from a VPC, joined with its parent prefix
#[derive(Debug, Clone, Serialize)]
pub struct VpcAssociationDetail {
    pub association_id: String,
    pub vpc_prefix_cidr: String,
    pub routable: bool,
    pub prefix_id: String,
    pub prefix_cidr: String,
    pub prefix_vrf_id: String,
    pub prefix_tags: TagMap,
    pub prefix_source: String,
}

/// Association as seen from a prefix, joined with its VPC
#[derive(Debug, Clone, Serialize)]
pub struct PrefixAssociationDetail {
    pub association_id: String,
    pub vpc_id: String,
    pub vpc_prefix_cidr: String,
    pub routable: bool,
    pub provider_vpc_id: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

// ========== Idempotency ==========

#[derive(Debug, Clone, Serialize)]
pub struct IdempotencyStats {
    pub total_records: i64,
}
