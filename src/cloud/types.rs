use serde::{Deserialize, Serialize};

use crate::models::TagMap;

/// One subnet CIDR as reported by the cloud. A dual-stack subnet yields one
/// record for its IPv4 block plus one per associated IPv6 block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSubnet {
    pub subnet_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub state: String,
    #[serde(default)]
    pub tags: TagMap,
    pub ip_version: u8,
}

/// Raw subnet entry on the wire, before IPv6 associations are unrolled
#[derive(Debug, Clone, Deserialize)]
pub struct CloudSubnetRecord {
    pub subnet_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub state: String,
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default)]
    pub ipv6_cidr_block_associations: Vec<Ipv6Association>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ipv6Association {
    pub ipv6_cidr_block: String,
    pub state: String,
}

/// Paged subnet listing response
#[derive(Debug, Deserialize)]
pub struct SubnetPage {
    pub subnets: Vec<CloudSubnetRecord>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// Unroll a wire record into per-CIDR subnet entries: the IPv4 block plus one
/// entry per *associated* IPv6 block. Pending or failed IPv6 associations are
/// not mirrored.
pub fn flatten_subnet_record(record: &CloudSubnetRecord) -> Vec<CloudSubnet> {
    let mut out = vec![CloudSubnet {
        subnet_id: record.subnet_id.clone(),
        cidr_block: record.cidr_block.clone(),
        availability_zone: record.availability_zone.clone(),
        state: record.state.clone(),
        tags: record.tags.clone(),
        ip_version: 4,
    }];

    for association in &record.ipv6_cidr_block_associations {
        if association.state == "associated" {
            out.push(CloudSubnet {
                subnet_id: record.subnet_id.clone(),
                cidr_block: association.ipv6_cidr_block.clone(),
                availability_zone: record.availability_zone.clone(),
                state: record.state.clone(),
                tags: record.tags.clone(),
                ip_version: 6,
            });
        }
    }

    out
}

/// Per-VPC sync counters
#[derive(Debug, Default, Clone, Serialize)]
pub struct VpcSyncOutcome {
    pub created: usize,
    pub tombstoned: usize,
    pub updated: usize,
    pub resurrected: usize,
    pub orphaned: usize,
    pub errors: Vec<String>,
}

/// Whole-cycle summary
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleSummary {
    pub total_vpcs: usize,
    pub synced: usize,
    pub skipped_unreachable: usize,
    pub duration_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_subnet_record_unrolls_associated_ipv6() {
        let record = CloudSubnetRecord {
            subnet_id: "subnet-1".to_string(),
            cidr_block: "10.0.1.0/24".to_string(),
            availability_zone: "us-east-2a".to_string(),
            state: "available".to_string(),
            tags: TagMap::new(),
            ipv6_cidr_block_associations: vec![
                Ipv6Association {
                    ipv6_cidr_block: "2600:1f16::/64".to_string(),
                    state: "associated".to_string(),
                },
                Ipv6Association {
                    ipv6_cidr_block: "2600:1f17::/64".to_string(),
                    state: "disassociating".to_string(),
                },
            ],
        };

        let flat = flatten_subnet_record(&record);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].cidr_block, "10.0.1.0/24");
        assert_eq!(flat[0].ip_version, 4);
        assert_eq!(flat[1].cidr_block, "2600:1f16::/64");
        assert_eq!(flat[1].ip_version, 6);
        assert_eq!(flat[1].subnet_id, "subnet-1");
    }
}
